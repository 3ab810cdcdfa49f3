//! Fan-out of a processed message to every configured destination.
//!
//! Each destination is delivered through the deadline-bounded service from
//! [`delivery_service`], inside a `delivery` span. Failures are isolated per destination and
//! recorded as outcomes; they never abort sibling deliveries. Outcomes are
//! returned in configuration order regardless of completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{DeliveryStatus, DestinationConfig, DestinationOutcome};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tower::ServiceExt;
use tracing::{info, info_span, warn, Instrument};

use crate::service::delivery::{delivery_service, Delivery, DeliveryContext, DispatchError};
use crate::traits::Transport;

/// Delivers messages to destinations with bounded parallelism.
#[derive(Clone)]
pub struct DestinationDispatcher {
    transport: Arc<dyn Transport>,
    deadline: Duration,
    max_concurrent: usize,
}

impl DestinationDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeout_ms: u64, max_concurrent: usize) -> Self {
        Self {
            transport,
            deadline: Duration::from_millis(timeout_ms),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Delivers `message` to each destination and returns one outcome per
    /// destination, in the same order.
    pub async fn dispatch(
        &self,
        process_id: &str,
        channel_id: &str,
        destinations: &[DestinationConfig],
        message: &Value,
    ) -> Vec<DestinationOutcome> {
        let payload = Arc::new(message.clone());
        let deliveries: Vec<_> = destinations
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, destination)| {
                let ctx = DeliveryContext {
                    process_id: process_id.to_string(),
                    channel_id: channel_id.to_string(),
                    index,
                };
                self.deliver(ctx, destination, Arc::clone(&payload))
            })
            .collect();
        stream::iter(deliveries)
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    async fn deliver(
        &self,
        ctx: DeliveryContext,
        destination: DestinationConfig,
        payload: Arc<Value>,
    ) -> DestinationOutcome {
        if let DestinationConfig::Unrecognized { kind, .. } = &destination {
            warn!(
                channel_id = %ctx.channel_id,
                index = ctx.index,
                kind = %kind,
                "skipping destination with unsupported type"
            );
            return DestinationOutcome::describe(&destination, DeliveryStatus::Skipped)
                .with_error(DispatchError::Unsupported { kind: kind.clone() }.to_string());
        }

        let span = info_span!(
            "delivery",
            channel_id = %ctx.channel_id,
            process_id = %ctx.process_id,
            index = ctx.index,
            destination = %destination.kind(),
        );
        let delivery = Delivery {
            ctx,
            destination: destination.clone(),
            payload,
        };
        let started = Instant::now();
        let result = delivery_service(Arc::clone(&self.transport), self.deadline)
            .oneshot(delivery)
            .instrument(span.clone())
            .await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                span.in_scope(|| info!(duration_ms, "delivery complete"));
                DestinationOutcome::describe(&destination, DeliveryStatus::Sent)
            }
            Err(err) => {
                let status = match err {
                    DispatchError::Timeout { .. } => DeliveryStatus::Timeout,
                    _ => DeliveryStatus::Error,
                };
                span.in_scope(|| warn!(duration_ms, ?status, error = %err, "delivery failed"));
                DestinationOutcome::describe(&destination, status).with_error(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::pipeline::transport::SimulatedTransport;

    /// Fails sends to one URL and finishes earlier destinations last.
    struct ScriptedTransport {
        failing_url: &'static str,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(failing_url: &'static str) -> Self {
            Self {
                failing_url,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            destination: &DestinationConfig,
            _payload: &Value,
        ) -> Result<(), DispatchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let DestinationConfig::Http(http) = destination else {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            };
            let n: u64 = http.url.trim_start_matches("http://d").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if http.url == self.failing_url {
                Err(DispatchError::transport("503 Service Unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn destinations(n: usize) -> Vec<DestinationConfig> {
        (0..n)
            .map(|i| DestinationConfig::http(format!("http://d{i}")))
            .collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_siblings() {
        let transport = Arc::new(ScriptedTransport::new("http://d2"));
        let dispatcher = DestinationDispatcher::new(transport, 5_000, 4);

        let outcomes = dispatcher
            .dispatch("p1", "c1", &destinations(4), &json!({"x": 1}))
            .await;

        assert_eq!(outcomes.len(), 4);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.url.as_deref(), Some(format!("http://d{i}").as_str()));
            let expected = if i == 2 {
                DeliveryStatus::Error
            } else {
                DeliveryStatus::Sent
            };
            assert_eq!(outcome.status, expected, "destination {i}");
        }
        assert_eq!(outcomes[2].error.as_deref(), Some("503 Service Unavailable"));
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let transport = Arc::new(ScriptedTransport::new("none"));
        let dispatcher = DestinationDispatcher::new(transport.clone(), 5_000, 2);
        dispatcher
            .dispatch("p1", "c1", &destinations(5), &json!({}))
            .await;
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unrecognized_destination_is_skipped() {
        let transport = Arc::new(SimulatedTransport::new());
        let dispatcher = DestinationDispatcher::new(transport.clone(), 5_000, 4);
        let unknown: DestinationConfig =
            serde_json::from_value(json!({"type": "smtp", "to": "ops@example.org"})).unwrap();

        let outcomes = dispatcher
            .dispatch(
                "p1",
                "c1",
                &[unknown, DestinationConfig::tcp("lab", 6661, true)],
                &json!("MSH|"),
            )
            .await;

        assert_eq!(outcomes[0].status, DeliveryStatus::Skipped);
        assert_eq!(outcomes[0].destination_type, "smtp");
        assert_eq!(outcomes[1].status, DeliveryStatus::Sent);
        assert_eq!(transport.sent().len(), 1);
    }

    /// Transport that never completes.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(
            &self,
            _destination: &DestinationConfig,
            _payload: &Value,
        ) -> Result<(), DispatchError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_destination_times_out() {
        let dispatcher = DestinationDispatcher::new(Arc::new(HangingTransport), 250, 4);
        let outcomes = dispatcher
            .dispatch("p1", "c1", &destinations(1), &json!({}))
            .await;
        assert_eq!(outcomes[0].status, DeliveryStatus::Timeout);
        assert_eq!(
            outcomes[0].error.as_deref(),
            Some("delivery timed out after 250ms")
        );
    }
}
