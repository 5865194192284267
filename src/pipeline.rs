//! The batching consumer pipeline.
//!
//! One supervising loop drives a pool of receive sessions: every iteration it
//! fans a receive call out to each session, waits for all of them, decodes
//! and correlates what came back, partitions the messages by kind, dispatches
//! each group to its batch handler concurrently, and resolves every delivery
//! through the session that produced it before the next iteration starts.
//! The two `join_all` barriers are what make locking unnecessary: no two
//! iterations overlap, and each delivery is owned by exactly one iteration.

mod config;

use std::collections::HashMap;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::errors::PipelineError;
use crate::handler::HandlerRegistry;
use crate::message::{MessageKind, PaymentEvent};
use crate::queue::{DeliveryToken, QueueConnection, QueueSession, RawDelivery};

pub use config::PipelineConfig;

/// A decoded message still tied to its broker delivery.
///
/// Handlers only ever see [`PaymentEvent`] values; this carrier is what lets
/// the pipeline find its way back to the delivery token and the owning
/// receiver once a batched handler call has finished.
#[derive(Debug)]
pub struct CorrelatedMessage {
    pub event: PaymentEvent,
    pub delivery: RawDelivery,
    /// Index of the receive session that produced the delivery. Resolution
    /// must go through this session; tokens are not transferable.
    pub receiver: usize,
}

/// The batching consumer pipeline over some queue backend.
pub struct BatchPipeline<C: QueueConnection> {
    connection: C,
    queue: String,
    registry: HandlerRegistry,
    config: PipelineConfig,
}

impl<C: QueueConnection> BatchPipeline<C> {
    pub fn new(connection: C, queue: impl Into<String>, registry: HandlerRegistry) -> Self {
        Self {
            connection,
            queue: queue.into(),
            registry,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Provision the queue, open the receiver pool, and run iterations until
    /// `cancel` fires. Provisioning and session-open failures are fatal;
    /// everything after that is contained per stage. The iteration in flight
    /// when cancellation is observed completes its resolutions before the
    /// sessions are closed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.connection
            .ensure_queue(&self.queue, &self.config.queue_policy)
            .await
            .map_err(|source| PipelineError::Provisioning {
                queue: self.queue.clone(),
                source,
            })?;

        let mut sessions = Vec::with_capacity(self.config.receiver_count);
        for index in 0..self.config.receiver_count {
            let session = self.connection.open_session(&self.queue).await.map_err(
                |source| PipelineError::SessionOpen {
                    queue: self.queue.clone(),
                    index,
                    source,
                },
            )?;
            sessions.push(session);
        }

        tracing::info!(
            queue = %self.queue,
            receivers = sessions.len(),
            batch_size = self.config.receive_batch_size,
            "batch pipeline started"
        );

        while !cancel.is_cancelled() {
            self.run_iteration(&sessions, &cancel).await;
        }

        for (index, result) in join_all(sessions.iter().map(|session| session.close()))
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(err) = result {
                tracing::warn!(receiver = index, error = %err, "failed to close receive session");
            }
        }
        tracing::info!(queue = %self.queue, "batch pipeline stopped");
        Ok(())
    }

    async fn run_iteration(&self, sessions: &[C::Session], cancel: &CancellationToken) {
        let batches = join_all(sessions.iter().enumerate().map(|(index, session)| {
            Self::collect_messages(index, session, self.config.receive_batch_size, cancel)
        }))
        .await;
        let messages: Vec<CorrelatedMessage> = batches.into_iter().flatten().collect();

        if messages.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.empty_backoff) => {}
                _ = cancel.cancelled() => {}
            }
            return;
        }
        tracing::debug!(count = messages.len(), "received message batch");

        let groups = group_by_kind(messages);
        join_all(
            groups
                .into_iter()
                .map(|(kind, group)| self.dispatch_group(sessions, kind, group)),
        )
        .await;
    }

    /// Receive and decode one receiver's batch. A failed receive contributes
    /// nothing (the other receivers' results still go through); a failed
    /// decode dead-letters that single delivery immediately.
    async fn collect_messages(
        receiver: usize,
        session: &C::Session,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Vec<CorrelatedMessage> {
        let deliveries = match session.receive(max_messages, cancel).await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                tracing::error!(receiver, error = %err, "failed to receive messages");
                return Vec::new();
            }
        };

        let mut messages = Vec::with_capacity(deliveries.len());
        let mut remaining = deliveries.into_iter();
        while let Some(delivery) = remaining.next() {
            if cancel.is_cancelled() {
                // Hand everything not yet decoded back for redelivery.
                let undecoded: Vec<DeliveryToken> = std::iter::once(delivery)
                    .chain(remaining)
                    .map(|d| d.token)
                    .collect();
                if let Err(err) = session.release(&undecoded).await {
                    tracing::warn!(receiver, error = %err, "failed to release undecoded deliveries");
                }
                break;
            }
            match codec::decode(&delivery) {
                Ok(event) => messages.push(CorrelatedMessage {
                    event,
                    delivery,
                    receiver,
                }),
                Err(err) => {
                    tracing::warn!(receiver, error = %err, "dead-lettering undecodable payload");
                    if let Err(err) = session.dead_letter(std::slice::from_ref(&delivery)).await {
                        tracing::error!(receiver, error = %err, "failed to dead-letter payload");
                    }
                }
            }
        }
        messages
    }

    /// Dispatch one group to its handler, then resolve every delivery in the
    /// group, batched per owning receiver: acknowledge on success, release on
    /// failure, dead-letter when no handler is registered for the kind.
    async fn dispatch_group(
        &self,
        sessions: &[C::Session],
        kind: MessageKind,
        group: Vec<CorrelatedMessage>,
    ) {
        let Some(handler) = self.registry.get(kind) else {
            tracing::error!(
                ?kind,
                count = group.len(),
                "no handler registered, dead-lettering group"
            );
            let by_receiver = group_deliveries_by_receiver(group);
            join_all(by_receiver.into_iter().map(|(receiver, deliveries)| async move {
                if let Err(err) = sessions[receiver].dead_letter(&deliveries).await {
                    tracing::error!(receiver, error = %err, "failed to dead-letter unroutable group");
                }
            }))
            .await;
            return;
        };

        let (events, resolutions): (Vec<PaymentEvent>, Vec<(usize, DeliveryToken)>) = group
            .into_iter()
            .map(|message| (message.event, (message.receiver, message.delivery.token)))
            .unzip();

        match handler.handle(&events).await {
            Ok(()) => {
                tracing::debug!(?kind, count = events.len(), "handler succeeded, acknowledging group");
                let by_receiver = group_tokens_by_receiver(resolutions);
                join_all(by_receiver.into_iter().map(|(receiver, tokens)| async move {
                    if let Err(err) = sessions[receiver].acknowledge(&tokens).await {
                        tracing::error!(receiver, error = %err, "failed to acknowledge group");
                    }
                }))
                .await;
            }
            Err(err) => {
                tracing::warn!(
                    ?kind,
                    count = events.len(),
                    error = %err,
                    "handler failed, releasing group for redelivery"
                );
                let by_receiver = group_tokens_by_receiver(resolutions);
                join_all(by_receiver.into_iter().map(|(receiver, tokens)| async move {
                    if let Err(err) = sessions[receiver].release(&tokens).await {
                        tracing::error!(receiver, error = %err, "failed to release group");
                    }
                }))
                .await;
            }
        }
    }
}

/// Partition messages into per-kind groups, preserving per-receiver arrival
/// order within each group.
fn group_by_kind(messages: Vec<CorrelatedMessage>) -> HashMap<MessageKind, Vec<CorrelatedMessage>> {
    let mut groups: HashMap<MessageKind, Vec<CorrelatedMessage>> = HashMap::new();
    for message in messages {
        groups.entry(message.event.kind()).or_default().push(message);
    }
    groups
}

fn group_tokens_by_receiver(
    resolutions: Vec<(usize, DeliveryToken)>,
) -> HashMap<usize, Vec<DeliveryToken>> {
    let mut by_receiver: HashMap<usize, Vec<DeliveryToken>> = HashMap::new();
    for (receiver, token) in resolutions {
        by_receiver.entry(receiver).or_default().push(token);
    }
    by_receiver
}

fn group_deliveries_by_receiver(
    group: Vec<CorrelatedMessage>,
) -> HashMap<usize, Vec<RawDelivery>> {
    let mut by_receiver: HashMap<usize, Vec<RawDelivery>> = HashMap::new();
    for message in group {
        by_receiver
            .entry(message.receiver)
            .or_default()
            .push(message.delivery);
    }
    by_receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CollectionPeriod, PaymentCompleted, PaymentRefunded};
    use rust_decimal_macros::dec;

    fn completed(event_id: &str) -> PaymentEvent {
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

    fn refunded(event_id: &str) -> PaymentEvent {
        PaymentEvent::Refunded(PaymentRefunded {
            event_id: event_id.to_string(),
            original_event_id: "evt-0".to_string(),
            ukprn: 10003678,
            learner_reference_number: "learn-ref-1".to_string(),
            amount: dec!(-1000),
            collection_period: CollectionPeriod {
                academic_year: 2526,
                period: 2,
            },
        })
    }

    fn correlated(event: PaymentEvent, token: &str, receiver: usize) -> CorrelatedMessage {
        CorrelatedMessage {
            delivery: RawDelivery {
                payload: String::new(),
                token: DeliveryToken::new(token),
            },
            event,
            receiver,
        }
    }

    #[test]
    fn grouping_is_a_pure_partition() {
        let messages = vec![
            correlated(completed("evt-1"), "t-1", 0),
            correlated(refunded("evt-2"), "t-2", 0),
            correlated(completed("evt-3"), "t-3", 1),
            correlated(completed("evt-4"), "t-4", 2),
        ];

        let groups = group_by_kind(messages);

        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, 4);
        assert_eq!(groups[&MessageKind::Completed].len(), 3);
        assert_eq!(groups[&MessageKind::Refunded].len(), 1);

        // Per-receiver arrival order survives within a group.
        let completed_ids: Vec<&str> = groups[&MessageKind::Completed]
            .iter()
            .map(|m| m.event.event_id())
            .collect();
        assert_eq!(completed_ids, vec!["evt-1", "evt-3", "evt-4"]);
    }

    #[test]
    fn resolution_batches_are_split_per_owning_receiver() {
        let resolutions = vec![
            (0, DeliveryToken::new("t-1")),
            (1, DeliveryToken::new("t-2")),
            (0, DeliveryToken::new("t-3")),
        ];

        let by_receiver = group_tokens_by_receiver(resolutions);

        assert_eq!(by_receiver[&0].len(), 2);
        assert_eq!(by_receiver[&1].len(), 1);
    }
}
