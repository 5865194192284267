//! In-memory queue backend for testing or local pipelines.
//!
//! Messages live in a shared broker state behind a mutex. The backend models
//! the parts of a real broker the pipeline depends on: pending vs. in-flight
//! deliveries, per-session token ownership, redelivery counts, and the
//! `<queue>-errors` dead-letter convention. Inspection helpers expose the
//! resulting state for assertions.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;
use crate::queue::{
    DeliveryToken, QueueConnection, QueuePolicy, QueueSession, RawDelivery, error_queue_name,
};

#[derive(Default)]
struct Broker {
    queues: HashMap<String, QueueState>,
    next_token: u64,
    next_session: usize,
}

#[derive(Default)]
struct QueueState {
    policy: Option<QueuePolicy>,
    pending: VecDeque<StoredMessage>,
    in_flight: HashMap<DeliveryToken, InFlight>,
    acknowledged: Vec<String>,
    released_total: usize,
}

struct StoredMessage {
    payload: String,
    delivery_count: u32,
}

struct InFlight {
    payload: String,
    delivery_count: u32,
    session: usize,
}

/// Shared in-memory broker. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    broker: Arc<Mutex<Broker>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw payload, creating the queue if needed.
    pub async fn seed(&self, queue: &str, payload: impl Into<String>) {
        let mut broker = self.broker.lock().await;
        broker
            .queues
            .entry(queue.to_string())
            .or_default()
            .pending
            .push_back(StoredMessage {
                payload: payload.into(),
                delivery_count: 0,
            });
    }

    /// Payloads acknowledged on `queue`, in acknowledgment order. A token is
    /// removed from flight on first resolution, so each delivery shows up at
    /// most once.
    pub async fn acknowledged(&self, queue: &str) -> Vec<String> {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(queue)
            .map(|q| q.acknowledged.clone())
            .unwrap_or_default()
    }

    /// Payloads sitting on the `<queue>-errors` dead-letter queue.
    pub async fn dead_letters(&self, queue: &str) -> Vec<String> {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(&error_queue_name(queue))
            .map(|q| q.pending.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Payloads currently pending redelivery on `queue`.
    pub async fn pending_payloads(&self, queue: &str) -> Vec<String> {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(queue)
            .map(|q| q.pending.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries received but not yet resolved on `queue`.
    pub async fn in_flight_count(&self, queue: &str) -> usize {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(queue)
            .map(|q| q.in_flight.len())
            .unwrap_or_default()
    }

    /// Total number of release calls resolved against `queue`, one per token.
    pub async fn released_total(&self, queue: &str) -> usize {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(queue)
            .map(|q| q.released_total)
            .unwrap_or_default()
    }

    /// The policy recorded when `queue` was provisioned, if any.
    pub async fn policy(&self, queue: &str) -> Option<QueuePolicy> {
        let broker = self.broker.lock().await;
        broker.queues.get(queue).and_then(|q| q.policy.clone())
    }
}

#[async_trait]
impl QueueConnection for InMemoryQueue {
    type Session = InMemorySession;

    async fn ensure_queue(&self, name: &str, policy: &QueuePolicy) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        // An existing queue keeps its original policy.
        broker
            .queues
            .entry(name.to_string())
            .or_default()
            .policy
            .get_or_insert_with(|| policy.clone());
        broker.queues.entry(error_queue_name(name)).or_default();
        Ok(())
    }

    async fn open_session(&self, queue: &str) -> Result<Self::Session, QueueError> {
        let mut broker = self.broker.lock().await;
        let id = broker.next_session;
        broker.next_session += 1;
        broker.queues.entry(queue.to_string()).or_default();
        Ok(InMemorySession {
            id,
            queue: queue.to_string(),
            broker: Arc::clone(&self.broker),
            closed: AtomicBool::new(false),
        })
    }
}

/// A receive session against the in-memory broker. Tokens it produces can
/// only be resolved through it.
pub struct InMemorySession {
    id: usize,
    queue: String,
    broker: Arc<Mutex<Broker>>,
    closed: AtomicBool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// Remove an in-flight entry, verifying the token exists and belongs to the
/// resolving session.
fn take_owned(
    queue: &mut QueueState,
    token: &DeliveryToken,
    session: usize,
) -> Result<InFlight, QueueError> {
    match queue.in_flight.entry(token.clone()) {
        Entry::Occupied(entry) => {
            if entry.get().session != session {
                return Err(QueueError::ForeignToken {
                    token: token.to_string(),
                    session,
                });
            }
            Ok(entry.remove())
        }
        Entry::Vacant(_) => Err(QueueError::UnknownToken(token.to_string())),
    }
}

#[async_trait]
impl QueueSession for InMemorySession {
    async fn receive(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelivery>, QueueError> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }
        let mut guard = self.broker.lock().await;
        let broker = &mut *guard;
        let Some(queue) = broker.queues.get_mut(&self.queue) else {
            return Ok(Vec::new());
        };

        let mut next_token = broker.next_token;
        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(mut message) = queue.pending.pop_front() else {
                break;
            };
            message.delivery_count += 1;
            let token = DeliveryToken::new(format!("d-{next_token}"));
            next_token += 1;
            queue.in_flight.insert(
                token.clone(),
                InFlight {
                    payload: message.payload.clone(),
                    delivery_count: message.delivery_count,
                    session: self.id,
                },
            );
            deliveries.push(RawDelivery {
                payload: message.payload,
                token,
            });
        }
        broker.next_token = next_token;
        Ok(deliveries)
    }

    async fn acknowledge(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut broker = self.broker.lock().await;
        let queue = broker
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| QueueError::Operation(format!("unknown queue: {}", self.queue)))?;
        for token in tokens {
            let in_flight = take_owned(queue, token, self.id)?;
            queue.acknowledged.push(in_flight.payload);
        }
        Ok(())
    }

    async fn release(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut broker = self.broker.lock().await;
        let mut over_cap = Vec::new();
        {
            let queue = broker
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| QueueError::Operation(format!("unknown queue: {}", self.queue)))?;
            // Redrive semantics: a message that has reached the provisioned
            // delivery cap goes to the error queue instead of back to pending.
            let delivery_cap = queue.policy.as_ref().map(|p| p.max_delivery_count);
            for token in tokens {
                let in_flight = take_owned(queue, token, self.id)?;
                queue.released_total += 1;
                match delivery_cap {
                    Some(cap) if in_flight.delivery_count >= cap => {
                        over_cap.push(in_flight.payload);
                    }
                    _ => queue.pending.push_back(StoredMessage {
                        payload: in_flight.payload,
                        delivery_count: in_flight.delivery_count,
                    }),
                }
            }
        }
        let errors = broker
            .queues
            .entry(error_queue_name(&self.queue))
            .or_default();
        for payload in over_cap {
            errors.pending.push_back(StoredMessage {
                payload,
                delivery_count: 0,
            });
        }
        Ok(())
    }

    async fn dead_letter(&self, deliveries: &[RawDelivery]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut broker = self.broker.lock().await;
        let mut moved = Vec::with_capacity(deliveries.len());
        {
            let queue = broker
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| QueueError::Operation(format!("unknown queue: {}", self.queue)))?;
            for delivery in deliveries {
                // The payload stored at receive time is forwarded, so the
                // dead-letter queue sees the original bytes.
                let in_flight = take_owned(queue, &delivery.token, self.id)?;
                moved.push(in_flight.payload);
            }
        }
        let errors = broker
            .queues
            .entry(error_queue_name(&self.queue))
            .or_default();
        for payload in moved {
            errors.pending.push_back(StoredMessage {
                payload,
                delivery_count: 0,
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
