//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field carries the actual health, and
/// `store` reports whether the channel store answered.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let channels = state.channels.count().await;
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "state": health.as_str(),
        "store": if channels.is_ok() { "ok" } else { "error" },
        "channels": channels.ok(),
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe: 200 whenever the process can answer.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when ready, 503 while starting, draining, or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use conduit_core::{Channel, ChannelError, ChannelResult, ExpressionEngine};

    use super::*;
    use crate::network::ShutdownController;
    use crate::pipeline::{ChannelPipeline, SimulatedTransport};
    use crate::service::{ChannelService, ServerConfig};
    use crate::storage::MemoryChannelStore;

    fn test_state() -> AppState {
        let pipeline = ChannelPipeline::new(
            Arc::new(MemoryChannelStore::new()),
            Arc::new(ExpressionEngine::new()),
            Arc::new(SimulatedTransport::new()),
            &ServerConfig::default(),
        );
        AppState {
            channels: ChannelService::new(Arc::new(pipeline)),
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let state = test_state();
        state.shutdown.set_ready();
        let _guard = state.shutdown.in_flight_guard();

        let json = health_handler(State(state.clone())).await.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["store"], "ok");
        assert_eq!(json["channels"], 0);
        assert_eq!(json["in_flight"], 1);
        assert!(json["uptime_secs"].is_number());
    }

    /// Store that can count but refuses to load channels.
    struct CountingStore;

    #[async_trait::async_trait]
    impl crate::traits::ChannelStore for CountingStore {
        async fn get_by_id(&self, _id: &str) -> ChannelResult<Option<Channel>> {
            Ok(None)
        }

        async fn get_all(&self) -> ChannelResult<Vec<Channel>> {
            Err(ChannelError::store(anyhow::anyhow!("full scan")))
        }

        async fn add(&self, channel: Channel) -> ChannelResult<Channel> {
            Ok(channel)
        }

        async fn update(&self, channel: Channel) -> ChannelResult<Channel> {
            Ok(channel)
        }

        async fn delete(&self, _id: &str) -> ChannelResult<bool> {
            Ok(false)
        }

        async fn count(&self) -> ChannelResult<usize> {
            Ok(2)
        }
    }

    #[tokio::test]
    async fn health_counts_without_loading_channels() {
        let pipeline = ChannelPipeline::new(
            Arc::new(CountingStore),
            Arc::new(ExpressionEngine::new()),
            Arc::new(SimulatedTransport::new()),
            &ServerConfig::default(),
        );
        let state = AppState {
            channels: ChannelService::new(Arc::new(pipeline)),
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        };

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["store"], "ok");
        assert_eq!(json["channels"], 2);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);
        state.shutdown.begin_drain();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }
}
