//! Queue abstractions used by the batch pipeline.
//!
//! The pipeline talks to the broker through two traits: [`QueueConnection`]
//! provisions queues and opens receive sessions, and [`QueueSession`] performs
//! the receive and resolution calls for the deliveries it produced. A delivery
//! token is only valid against the session that issued it, which is why
//! resolution methods live on the session rather than the connection.
//!
//! Two backends are provided: [`sqs`] against AWS SQS and [`inmemory`] for
//! tests and local runs.

pub mod inmemory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;

/// An opaque broker-assigned handle identifying one received-but-unresolved
/// message instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw message as received from the queue: the payload exactly as it
/// arrived plus the token needed to resolve it.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub payload: String,
    pub token: DeliveryToken,
}

/// Declarative policy applied when provisioning a queue.
///
/// Defaults match the reference deployment: 7 day retention, dead-lettering on
/// expiration, 5 minute lock duration, 50 delivery attempts, 5 GiB cap.
/// Backends apply whatever subset their broker can express.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePolicy {
    pub retention: Duration,
    pub dead_letter_on_expiration: bool,
    pub lock_duration: Duration,
    pub max_delivery_count: u32,
    pub max_size_bytes: u64,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            dead_letter_on_expiration: true,
            lock_duration: Duration::from_secs(5 * 60),
            max_delivery_count: 50,
            max_size_bytes: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// The sibling queue that receives dead-lettered payloads for `queue`.
pub fn error_queue_name(queue: &str) -> String {
    format!("{queue}-errors")
}

/// A connection to a queueing backend: provisions queues and opens the
/// per-receiver sessions the pipeline pulls from.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    type Session: QueueSession + 'static;

    /// Ensure `name` exists with the given policy, along with its
    /// `<name>-errors` sibling. A no-op if the queue already exists.
    async fn ensure_queue(&self, name: &str, policy: &QueuePolicy) -> Result<(), QueueError>;

    /// Open an independent receive session against `queue`.
    async fn open_session(&self, queue: &str) -> Result<Self::Session, QueueError>;
}

/// One receive session. Deliveries returned by [`receive`](Self::receive) must
/// be resolved exactly once through this same session.
#[async_trait]
pub trait QueueSession: Send + Sync {
    /// Pull up to `max_messages` deliveries in one call. Returns an empty
    /// vector when nothing is available within the call's own timeout, or
    /// when `cancel` fires while waiting.
    async fn receive(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelivery>, QueueError>;

    /// Mark the deliveries as successfully processed, removing them from the
    /// queue.
    async fn acknowledge(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError>;

    /// Return the deliveries to the queue for redelivery.
    async fn release(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError>;

    /// Move the deliveries to the error queue for manual inspection. The
    /// payload is forwarded verbatim.
    async fn dead_letter(&self, deliveries: &[RawDelivery]) -> Result<(), QueueError>;

    /// Release the session's resources. Further calls fail with
    /// [`QueueError::SessionClosed`] on backends that track session state.
    async fn close(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_reference_deployment() {
        let policy = QueuePolicy::default();
        assert_eq!(policy.retention, Duration::from_secs(604_800));
        assert!(policy.dead_letter_on_expiration);
        assert_eq!(policy.lock_duration, Duration::from_secs(300));
        assert_eq!(policy.max_delivery_count, 50);
        assert_eq!(policy.max_size_bytes, 5_368_709_120);
    }

    #[test]
    fn error_queue_is_a_named_sibling() {
        assert_eq!(error_queue_name("payments"), "payments-errors");
    }
}
