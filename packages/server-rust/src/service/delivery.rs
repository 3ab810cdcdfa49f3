//! The unit of work handed to a transport, and the tower stack that bounds it.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::DestinationConfig;
use serde_json::Value;
use tower::timeout::error::Elapsed;
use tower::util::BoxService;
use tower::{BoxError, ServiceBuilder};

use crate::pipeline::transport::TransportService;
use crate::traits::Transport;

/// Where a delivery came from, for logs and outcome reporting.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub process_id: String,
    pub channel_id: String,
    /// Position of the destination in the channel configuration.
    pub index: usize,
}

/// One message bound for one destination.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub ctx: DeliveryContext,
    pub destination: DestinationConfig,
    pub payload: Arc<Value>,
}

/// Errors returned by a destination send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{message}")]
    Transport { message: String },
    #[error("delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("unsupported destination type '{kind}'")]
    Unsupported { kind: String },
}

impl DispatchError {
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    /// Recovers a typed error from the boxed error produced by tower's timeout.
    fn from_stack(err: BoxError, deadline: Duration) -> Self {
        if err.is::<Elapsed>() {
            return Self::Timeout {
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            };
        }
        match err.downcast::<Self>() {
            Ok(typed) => *typed,
            Err(other) => Self::transport(other),
        }
    }
}

/// A transport bounded by a per-delivery deadline.
pub type DeliveryService = BoxService<Delivery, (), DispatchError>;

/// Wraps `transport` so each delivery fails with [`DispatchError::Timeout`]
/// once `deadline` passes.
#[must_use]
pub fn delivery_service(transport: Arc<dyn Transport>, deadline: Duration) -> DeliveryService {
    ServiceBuilder::new()
        .boxed()
        .map_err(move |err: BoxError| DispatchError::from_stack(err, deadline))
        .timeout(deadline)
        .service(TransportService::new(transport))
}
