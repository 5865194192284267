//! # SQS Batch Ingest
//!
//! An asynchronous batched queue ingestion pipeline for payment events,
//! built as a proof-of-concept comparing batched handling against the usual
//! one-message-at-a-time consumer.
//!
//! ## Features
//!
//! - Parallel receive sessions pulling bounded batches with tokio
//! - Trait-based batch handlers routed by message kind
//! - Exactly-once resolution of every delivery per iteration: acknowledge on
//!   handler success, release for redelivery on failure, dead-letter for
//!   undecodable payloads and unroutable kinds
//! - Per-receiver batched resolution calls to amortize broker round trips
//! - Idempotent queue provisioning with a declarative policy
//! - AWS SQS backend plus an in-memory backend for tests and local runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sqs_batch_ingest::queue::sqs::SqsConnection;
//! use sqs_batch_ingest::{
//!     BatchPipeline, HandlerRegistry, MessageKind, StorePaymentsHandler,
//!     storage::InMemoryStorage,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = InMemoryStorage::new();
//!     let registry = HandlerRegistry::new()
//!         .register(
//!             MessageKind::Completed,
//!             Arc::new(StorePaymentsHandler::new(storage.clone())),
//!         )
//!         .register(
//!             MessageKind::Refunded,
//!             Arc::new(StorePaymentsHandler::new(storage)),
//!         );
//!
//!     let connection = SqsConnection::from_env().await;
//!     let pipeline = BatchPipeline::new(connection, "payments", registry);
//!
//!     let cancel = CancellationToken::new();
//!     pipeline.run(cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod errors;
pub mod handler;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod storage;

pub use errors::{DecodeError, HandlerError, PipelineError, QueueError, StorageError};
pub use handler::{BatchHandler, HandlerRegistry, StorePaymentsHandler};
pub use message::{MessageKind, PaymentEvent};
pub use pipeline::{BatchPipeline, CorrelatedMessage, PipelineConfig};
pub use queue::{DeliveryToken, QueueConnection, QueuePolicy, QueueSession, RawDelivery};
pub use storage::{InMemoryStorage, StorageWriter};
