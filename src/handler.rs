//! Batch handlers and the registry that routes message groups to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::HandlerError;
use crate::message::{MessageKind, PaymentEvent};
use crate::storage::StorageWriter;

/// Capability to process a uniform batch of messages as a single unit.
///
/// Exactly one outcome per call, applying to the whole batch: there is no
/// partial-batch success model. Handlers must be idempotent-safe, since a
/// failed (released) batch will be redelivered and handled again.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &[PaymentEvent]) -> Result<(), HandlerError>;
}

/// Static mapping from message kind to its batch handler, resolved at
/// startup. A kind without a registered handler is a configuration error;
/// the pipeline dead-letters such groups since redelivery cannot help.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Arc<dyn BatchHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous registration.
    pub fn register(mut self, kind: MessageKind, handler: Arc<dyn BatchHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: MessageKind) -> Option<&Arc<dyn BatchHandler>> {
        self.handlers.get(&kind)
    }
}

/// Reference handler: persists the batch to a [`StorageWriter`] in one bulk
/// write and fails the whole batch on any storage error.
pub struct StorePaymentsHandler<W> {
    writer: W,
}

impl<W> StorePaymentsHandler<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: StorageWriter> BatchHandler for StorePaymentsHandler<W> {
    async fn handle(&self, batch: &[PaymentEvent]) -> Result<(), HandlerError> {
        tracing::info!(count = batch.len(), "persisting payment batch");
        self.writer.write_batch(batch).await?;
        Ok(())
    }
}
