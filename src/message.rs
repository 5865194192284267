//! Typed application messages carried on the payments queue.
//!
//! The wire format is JSON with a `"type"` tag that selects the logical
//! message type. Everything downstream of the codec works with
//! [`PaymentEvent`] values and groups them by [`MessageKind`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The logical type of a [`PaymentEvent`], used as the grouping key when
/// batching messages for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Completed,
    Refunded,
}

/// A decoded payment event. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaymentEvent {
    #[serde(rename = "payment-completed")]
    Completed(PaymentCompleted),
    #[serde(rename = "payment-refunded")]
    Refunded(PaymentRefunded),
}

impl PaymentEvent {
    /// The discriminant used to group messages of the same logical type.
    pub fn kind(&self) -> MessageKind {
        match self {
            PaymentEvent::Completed(_) => MessageKind::Completed,
            PaymentEvent::Refunded(_) => MessageKind::Refunded,
        }
    }

    /// The natural identifier of the event. Storage keys records by this id,
    /// which is what makes redelivered batches safe to write again.
    pub fn event_id(&self) -> &str {
        match self {
            PaymentEvent::Completed(payment) => &payment.event_id,
            PaymentEvent::Refunded(refund) => &refund.event_id,
        }
    }
}

/// A funded payment for a learner in one collection period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub event_id: String,
    pub ukprn: i64,
    pub learner_reference_number: String,
    pub learner_uln: i64,
    pub amount: Decimal,
    pub collection_period: CollectionPeriod,
    pub delivery_period: u8,
    pub funding_line_type: String,
}

/// A refund issued against a previously completed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub event_id: String,
    pub original_event_id: String,
    pub ukprn: i64,
    pub learner_reference_number: String,
    pub amount: Decimal,
    pub collection_period: CollectionPeriod,
}

/// The collection period a payment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPeriod {
    pub academic_year: i16,
    pub period: u8,
}
