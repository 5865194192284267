//! Durable storage of processed payment events.
//!
//! The pipeline delivers at-least-once, so a batch that was released after a
//! handler failure will come around again. [`StorageWriter`] implementations
//! must therefore treat a record whose event id was already written as an
//! overwrite or no-op, never as a duplication error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::StorageError;
use crate::message::PaymentEvent;

/// Capability to persist a batch of payment events in one bulk write.
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Write the whole batch or fail as a whole. Must be safe to call again
    /// with overlapping records after a prior partial or full success.
    async fn write_batch(&self, records: &[PaymentEvent]) -> Result<(), StorageError>;
}

/// In-memory storage keyed by event id. Writing the same event twice keeps a
/// single record, which is exactly the idempotence the pipeline relies on.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    records: Arc<Mutex<HashMap<String, PaymentEvent>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Snapshot of the stored records, unordered.
    pub async fn records(&self) -> Vec<PaymentEvent> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl StorageWriter for InMemoryStorage {
    async fn write_batch(&self, records: &[PaymentEvent]) -> Result<(), StorageError> {
        let mut stored = self.records.lock().await;
        for record in records {
            stored.insert(record.event_id().to_string(), record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CollectionPeriod, PaymentCompleted};
    use rust_decimal_macros::dec;

    fn payment(event_id: &str) -> PaymentEvent {
        PaymentEvent::Completed(PaymentCompleted {
            event_id: event_id.to_string(),
            ukprn: 10003678,
            learner_reference_number: "learn-ref-1".to_string(),
            learner_uln: 9999991,
            amount: dec!(1000),
            collection_period: CollectionPeriod {
                academic_year: 2526,
                period: 1,
            },
            delivery_period: 1,
            funding_line_type: "non-levy".to_string(),
        })
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let storage = InMemoryStorage::new();
        let batch = vec![payment("evt-1"), payment("evt-2")];

        storage.write_batch(&batch).await.unwrap();
        storage.write_batch(&batch).await.unwrap();

        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn overlapping_batches_keep_one_record_per_event() {
        let storage = InMemoryStorage::new();
        storage.write_batch(&[payment("evt-1")]).await.unwrap();
        storage
            .write_batch(&[payment("evt-1"), payment("evt-2")])
            .await
            .unwrap();

        assert_eq!(storage.len().await, 2);
    }
}
