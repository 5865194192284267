//! AWS SQS queue backend.
//!
//! SQS is connectionless, so a "session" here is a cheap clone of the SDK
//! client bound to a queue URL; the per-session token ownership rule is
//! trivially satisfied because receipt handles are valid on any client.
//! Dead-lettering follows the `<queue>-errors` convention: the payload is
//! forwarded verbatim to the error queue and the original delivery deleted.

use aws_config::Region;
use aws_sdk_sqs::config::SharedCredentialsProvider;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{
    ChangeMessageVisibilityBatchRequestEntry, DeleteMessageBatchRequestEntry, QueueAttributeName,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;
use crate::queue::{
    DeliveryToken, QueueConnection, QueuePolicy, QueueSession, RawDelivery, error_queue_name,
};

/// SQS caps batch entry counts and `receive_message` page size at 10.
const SQS_BATCH_LIMIT: usize = 10;

/// A connection to SQS, wrapping a configured SDK client.
#[derive(Clone)]
pub struct SqsConnection {
    client: aws_sdk_sqs::Client,
}

impl SqsConnection {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Create a connection using credentials and configuration from the
    /// environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// `AWS_REGION`, `AWS_PROFILE`).
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_sqs::Client::new(&config))
    }

    /// Create a connection with explicitly provided credentials and region,
    /// for applications that manage credentials dynamically.
    pub fn with_credentials(
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
    ) -> Self {
        let credentials = aws_sdk_sqs::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "aws",
        );

        let shared_credentials = SharedCredentialsProvider::new(credentials);

        let config = aws_sdk_sqs::config::Builder::new()
            .region(Region::new(region.to_string()))
            .credentials_provider(shared_credentials)
            .build();

        Self::new(aws_sdk_sqs::Client::from_conf(config))
    }

    /// Create a queue, treating an already-existing queue as success.
    async fn create_queue(
        &self,
        name: &str,
        attributes: Vec<(QueueAttributeName, String)>,
    ) -> Result<(), QueueError> {
        let mut request = self.client.create_queue().queue_name(name);
        for (key, value) in attributes {
            request = request.attributes(key, value);
        }
        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_queue_name_exists() {
                    tracing::info!(queue = name, "queue already exists, skipping creation");
                    Ok(())
                } else {
                    Err(QueueError::Operation(
                        DisplayErrorContext(&service_error).to_string(),
                    ))
                }
            }
        }
    }

    async fn queue_url(&self, name: &str) -> Result<String, QueueError> {
        let response = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
        response
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::Operation(format!("no queue url returned for '{name}'")))
    }

    async fn queue_arn(&self, queue_url: &str) -> Result<String, QueueError> {
        let response = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
        response
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::QueueArn))
            .map(|arn| arn.to_string())
            .ok_or_else(|| {
                QueueError::Operation(format!("no queue arn returned for '{queue_url}'"))
            })
    }
}

#[async_trait]
impl QueueConnection for SqsConnection {
    type Session = SqsSession;

    /// Provision `name` and its `<name>-errors` sibling.
    ///
    /// Retention and lock duration map to queue attributes; the delivery
    /// count cap becomes a redrive policy targeting the error queue. SQS has
    /// no equivalent for a queue size cap or an expiration dead-letter flag
    /// (retention handles expiry), so those policy fields are not applied.
    async fn ensure_queue(&self, name: &str, policy: &QueuePolicy) -> Result<(), QueueError> {
        let error_queue = error_queue_name(name);
        self.create_queue(&error_queue, Vec::new()).await?;
        let error_url = self.queue_url(&error_queue).await?;
        let error_arn = self.queue_arn(&error_url).await?;

        let redrive_policy = format!(
            r#"{{"deadLetterTargetArn":"{error_arn}","maxReceiveCount":"{}"}}"#,
            policy.max_delivery_count
        );
        let attributes = vec![
            (
                QueueAttributeName::MessageRetentionPeriod,
                policy.retention.as_secs().to_string(),
            ),
            (
                QueueAttributeName::VisibilityTimeout,
                policy.lock_duration.as_secs().to_string(),
            ),
            (QueueAttributeName::RedrivePolicy, redrive_policy),
        ];
        self.create_queue(name, attributes).await
    }

    async fn open_session(&self, queue: &str) -> Result<Self::Session, QueueError> {
        Ok(SqsSession {
            client: self.client.clone(),
            queue_url: self.queue_url(queue).await?,
            error_queue_url: self.queue_url(&error_queue_name(queue)).await?,
        })
    }
}

/// A receive session bound to one queue URL.
pub struct SqsSession {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    error_queue_url: String,
}

#[async_trait]
impl QueueSession for SqsSession {
    async fn receive(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelivery>, QueueError> {
        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let chunk = (max_messages - deliveries.len()).min(SQS_BATCH_LIMIT) as i32;
            // Short poll only on the first page so an idle queue does not
            // stall the pipeline's iteration barrier.
            let wait_seconds = if deliveries.is_empty() { 1 } else { 0 };
            let request = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(chunk)
                .wait_time_seconds(wait_seconds);

            let response = tokio::select! {
                _ = cancel.cancelled() => break,
                result = request.send() => result
                    .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?,
            };

            let messages = response.messages();
            if messages.is_empty() {
                break;
            }
            for message in messages {
                let (Some(body), Some(receipt_handle)) =
                    (message.body(), message.receipt_handle())
                else {
                    tracing::warn!("received SQS message without body or receipt handle");
                    continue;
                };
                deliveries.push(RawDelivery {
                    payload: body.to_string(),
                    token: DeliveryToken::new(receipt_handle),
                });
            }
        }
        Ok(deliveries)
    }

    async fn acknowledge(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError> {
        for chunk in tokens.chunks(SQS_BATCH_LIMIT) {
            let mut request = self.client.delete_message_batch().queue_url(&self.queue_url);
            for (index, token) in chunk.iter().enumerate() {
                let entry = DeleteMessageBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(token.as_str())
                    .build()
                    .map_err(|err| QueueError::Operation(err.to_string()))?;
                request = request.entries(entry);
            }
            request
                .send()
                .await
                .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
        }
        Ok(())
    }

    async fn release(&self, tokens: &[DeliveryToken]) -> Result<(), QueueError> {
        for chunk in tokens.chunks(SQS_BATCH_LIMIT) {
            let mut request = self
                .client
                .change_message_visibility_batch()
                .queue_url(&self.queue_url);
            for (index, token) in chunk.iter().enumerate() {
                let entry = ChangeMessageVisibilityBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(token.as_str())
                    .visibility_timeout(0)
                    .build()
                    .map_err(|err| QueueError::Operation(err.to_string()))?;
                request = request.entries(entry);
            }
            request
                .send()
                .await
                .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
        }
        Ok(())
    }

    async fn dead_letter(&self, deliveries: &[RawDelivery]) -> Result<(), QueueError> {
        for delivery in deliveries {
            self.client
                .send_message()
                .queue_url(&self.error_queue_url)
                .message_body(&delivery.payload)
                .send()
                .await
                .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
            self.client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(delivery.token.as_str())
                .send()
                .await
                .map_err(|err| QueueError::Operation(DisplayErrorContext(&err).to_string()))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        // SQS is connectionless; there is no broker-side session to release.
        Ok(())
    }
}
