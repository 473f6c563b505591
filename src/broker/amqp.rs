//! AMQP transport over lapin.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::publish::{EvalPublisher, PublishError, encode};
use crate::types::EvaluationRequest;
use crate::upload::{UploadPool, parse_upload};

use super::Disposition;

const CONSUMER_TAG: &str = "patch-sync";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Opens a connection and a channel with `queue` declared durable.
pub async fn open_channel(uri: &str, queue: &str) -> Result<Channel, BrokerError> {
    let conn = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;
    declare(&channel, queue).await?;
    Ok(channel)
}

async fn declare(channel: &Channel, queue: &str) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Publishes evaluation requests to a queue via the default exchange.
#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    queue: String,
}

impl AmqpPublisher {
    pub async fn connect(uri: &str, queue: impl Into<String>) -> Result<Self, BrokerError> {
        let queue = queue.into();
        let channel = open_channel(uri, &queue).await?;
        Ok(AmqpPublisher { channel, queue })
    }
}

#[async_trait]
impl EvalPublisher for AmqpPublisher {
    #[instrument(level = "debug", skip_all, fields(queue = %self.queue, count = requests.len()))]
    async fn publish(&self, requests: &[EvaluationRequest]) -> Result<(), PublishError> {
        for request in requests {
            let body = encode(request)?;
            self.channel
                .basic_publish(
                    "",
                    &self.queue,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default().with_content_type("application/json".into()),
                )
                .await
                .map_err(|e| PublishError::Broker(format!("amqp publish: {e}")))?;
        }
        Ok(())
    }
}

/// Consumes upload messages from `queue` until cancelled.
///
/// Each delivery is validated, handed to the pool, and settled once the pool
/// reports back. Deliveries are settled from their own tasks so a slow lane
/// does not hold up the consumer. At most `prefetch` deliveries are
/// unacknowledged at once, which also bounds the number of settling tasks.
pub async fn run_upload_consumer(
    channel: Channel,
    queue: &str,
    prefetch: u16,
    pool: Arc<UploadPool>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;
    let mut consumer = channel
        .basic_consume(
            queue,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    info!(queue, prefetch, "Upload consumer started");

    loop {
        let delivery = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            next = consumer.next() => match next {
                Some(delivery) => delivery?,
                None => break,
            },
        };

        let disposition = match parse_upload(&delivery.data) {
            Err(err) => {
                warn!(reason = err.reason(), error = %err, "Dropping upload message");
                Disposition::for_rejection(&err)
            }
            Ok(upload) => {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let result = pool.submit_and_wait(upload).await;
                    settle(&delivery.acker, Disposition::for_result(&result)).await;
                });
                continue;
            }
        };
        settle(&delivery.acker, disposition).await;
    }

    info!(queue, "Upload consumer stopped");
    Ok(())
}

async fn settle(acker: &lapin::acker::Acker, disposition: Disposition) {
    let result = match disposition {
        Disposition::Ack => acker.ack(BasicAckOptions::default()).await,
        Disposition::Reject | Disposition::Requeue => {
            acker
                .nack(BasicNackOptions {
                    requeue: disposition == Disposition::Requeue,
                    ..Default::default()
                })
                .await
        }
    };
    match result {
        Ok(()) => debug!(?disposition, "Delivery settled"),
        Err(err) => warn!(?disposition, error = %err, "Failed to settle delivery"),
    }
}
