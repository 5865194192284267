use std::time::Duration;

use crate::queue::QueuePolicy;

/// Configuration for the batch pipeline.
///
/// Defaults match the reference deployment: 3 parallel receivers, up to 200
/// deliveries per receive call, and a 500ms backoff when the queue is empty.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of independent receive sessions pulled from concurrently.
    pub receiver_count: usize,

    /// Maximum deliveries requested per receiver per iteration.
    pub receive_batch_size: usize,

    /// How long to sleep before the next iteration when no receiver
    /// returned anything, to avoid busy-spinning an empty queue.
    pub empty_backoff: Duration,

    /// Policy applied when provisioning the queue at startup.
    pub queue_policy: QueuePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receiver_count: 3,
            receive_batch_size: 200,
            empty_backoff: Duration::from_millis(500),
            queue_policy: QueuePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_receiver_count(mut self, count: usize) -> Self {
        self.receiver_count = count;
        self
    }

    pub fn with_receive_batch_size(mut self, size: usize) -> Self {
        self.receive_batch_size = size;
        self
    }

    pub fn with_empty_backoff(mut self, backoff: Duration) -> Self {
        self.empty_backoff = backoff;
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }
}
