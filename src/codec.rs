//! Decoding raw queue payloads into typed [`PaymentEvent`]s.

use crate::errors::DecodeError;
use crate::message::PaymentEvent;
use crate::queue::RawDelivery;

/// Decode a raw delivery into a typed payment event.
///
/// Pure and deterministic: the same payload always produces the same result
/// and nothing is touched on the broker. On failure the returned
/// [`DecodeError`] carries the original payload so the caller can route it to
/// the dead-letter path verbatim.
pub fn decode(delivery: &RawDelivery) -> Result<PaymentEvent, DecodeError> {
    serde_json::from_str(&delivery.payload).map_err(|source| DecodeError {
        payload: delivery.payload.clone(),
        source,
    })
}
