//! Message-broker adapter.
//!
//! The AMQP transport lives in [`amqp`] behind the `rabbitmq` feature. What
//! to do with a delivery once the upload pool has seen it is decided here,
//! independent of the transport.

#[cfg(feature = "rabbitmq")]
pub mod amqp;

#[cfg(feature = "rabbitmq")]
pub use amqp::{AmqpPublisher, BrokerError, run_upload_consumer};

use crate::upload::{PoolError, UploadError, UploadOutcome};

/// Settlement of one inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Negative-acknowledge and drop: the message can never succeed.
    Reject,
    /// Negative-acknowledge and requeue for another attempt.
    Requeue,
}

impl Disposition {
    /// Settlement for a message rejected before it reached the pool.
    pub fn for_rejection(err: &UploadError) -> Self {
        if err.is_rejection() {
            Disposition::Reject
        } else {
            Disposition::Requeue
        }
    }

    /// Settlement for a message the pool has processed (or failed to take).
    pub fn for_result(result: &Result<Result<UploadOutcome, UploadError>, PoolError>) -> Self {
        match result {
            Ok(Ok(_)) => Disposition::Ack,
            Ok(Err(err)) => Disposition::for_rejection(err),
            Err(PoolError::ShutDown) => Disposition::Requeue,
        }
    }
}
