//! Orchestrates one message through a channel: filters, transformers, then
//! destinations.
//!
//! A call moves `Start -> Filtering -> Transforming -> Dispatching -> Done`,
//! leaving early as `Filtered` when a filter rejects the message or `Error`
//! when a stage fails. Stage failures are reported in the
//! [`ProcessingResult`]; only the checked entry points return `Err`.

use std::sync::Arc;
use std::time::Instant;

use conduit_core::{
    Channel, ChannelError, ChannelResult, PipelineStage, ProcessingResult, ScriptEngine,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::dispatch::DestinationDispatcher;
use crate::pipeline::stage::{FilterVerdict, ScriptStage, TransformOutcome};
use crate::service::config::ServerConfig;
use crate::traits::{ChannelStore, Transport};

/// Runs messages through channels loaded from an injected [`ChannelStore`].
#[derive(Clone)]
pub struct ChannelPipeline {
    store: Arc<dyn ChannelStore>,
    stage: ScriptStage,
    dispatcher: DestinationDispatcher,
}

impl ChannelPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChannelStore>,
        engine: Arc<dyn ScriptEngine>,
        transport: Arc<dyn Transport>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            store,
            stage: ScriptStage::new(engine, config.script_limits.clone(), config.script_timeout()),
            dispatcher: DestinationDispatcher::new(
                transport,
                config.dispatch_timeout_ms,
                config.max_concurrent_deliveries,
            ),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.store
    }

    /// Processes `message` through `channel` and reports what happened.
    ///
    /// The channel's `enabled` flag is not consulted here; see
    /// [`ChannelPipeline::process_with_checks`].
    pub async fn process(&self, channel: &Channel, message: Value) -> ProcessingResult {
        let started = Instant::now();
        let process_id = Uuid::new_v4().to_string();
        let original = message.clone();
        let mut warnings = Vec::new();

        let result = self
            .run_stages(channel, &process_id, message, &mut warnings)
            .await;

        #[allow(clippy::cast_possible_truncation)]
        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            channel_id = %channel.id,
            process_id = %process_id,
            status = ?result.status,
            duration_ms = processing_time_ms,
            "message processed"
        );

        ProcessingResult {
            process_id,
            original_message: Some(original),
            warnings,
            processing_time_ms,
            ..result
        }
    }

    async fn run_stages(
        &self,
        channel: &Channel,
        process_id: &str,
        message: Value,
        warnings: &mut Vec<String>,
    ) -> ProcessingResult {
        let mut current = message;

        debug!(channel_id = %channel.id, stage = ?PipelineStage::Filtering, count = channel.filters.len());
        for (i, filter) in channel.filters.iter().enumerate() {
            match self.stage.filter(filter, current).await {
                Ok(FilterVerdict::Pass(next)) => current = next,
                Ok(FilterVerdict::Reject) => {
                    debug!(channel_id = %channel.id, filter = i, "message filtered out");
                    return ProcessingResult::filtered(format!(
                        "Message filtered out by filter {i}"
                    ));
                }
                Err(err) => {
                    warn!(channel_id = %channel.id, filter = i, error = %err, "filter failed");
                    return ProcessingResult::error(format!("Filter {i} failed: {err}"));
                }
            }
        }

        debug!(channel_id = %channel.id, stage = ?PipelineStage::Transforming, count = channel.transformers.len());
        for (i, transformer) in channel.transformers.iter().enumerate() {
            match self.stage.transform(transformer, current).await {
                Ok(TransformOutcome::Transformed(next)) => current = next,
                Ok(TransformOutcome::Unchanged(same)) => {
                    warn!(channel_id = %channel.id, transformer = i, "transformer produced no output");
                    warnings.push(format!(
                        "Transformer {i} did not set _transformed; message passed through unchanged"
                    ));
                    current = same;
                }
                Err(err) => {
                    warn!(channel_id = %channel.id, transformer = i, error = %err, "transformer failed");
                    return ProcessingResult::error(format!("Transformer {i} failed: {err}"));
                }
            }
        }

        debug!(channel_id = %channel.id, stage = ?PipelineStage::Dispatching, count = channel.destinations.len());
        let outcomes = self
            .dispatcher
            .dispatch(process_id, &channel.id, &channel.destinations, &current)
            .await;
        ProcessingResult::success(current, outcomes)
    }

    /// Loads the channel and processes `message` if it exists and is enabled.
    ///
    /// The channel is read once; a concurrent disable or delete does not
    /// affect a call that has already loaded it.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotFound`] if no channel has this id.
    /// - [`ChannelError::Disabled`] if the channel is disabled.
    /// - [`ChannelError::Store`] if the store fails.
    pub async fn process_with_checks(
        &self,
        channel_id: &str,
        message: Value,
    ) -> ChannelResult<ProcessingResult> {
        let channel = self
            .store
            .get_by_id(channel_id)
            .await?
            .ok_or_else(|| ChannelError::not_found(channel_id))?;
        if !channel.enabled {
            return Err(ChannelError::Disabled {
                id: channel.id.clone(),
            });
        }
        Ok(self.process(&channel, message).await)
    }

    /// Compiles the channel's scripts against the configured engine.
    ///
    /// # Errors
    ///
    /// See [`ScriptStage::check_channel`].
    pub fn check_scripts(&self, channel: &Channel) -> ChannelResult<()> {
        self.stage.check_channel(channel)
    }

    /// Validates `channel`, compiles its scripts, and inserts it unless its
    /// id is already taken.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Validation`] / [`ChannelError::Configuration`] if the
    ///   channel breaks a domain rule or a script does not compile.
    /// - [`ChannelError::AlreadyExists`] if the id is taken; the store is untouched.
    /// - [`ChannelError::Store`] if the store fails.
    pub async fn create_channel_with_checks(&self, channel: Channel) -> ChannelResult<Channel> {
        channel.validate()?;
        self.check_scripts(&channel)?;
        self.store.add(channel).await
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{
        DeliveryStatus, DestinationConfig, ExpressionEngine, FilterConfig, ProcessingStatus,
        SourceConfig, TransformerConfig,
    };
    use serde_json::json;

    use super::*;
    use crate::pipeline::transport::SimulatedTransport;
    use crate::storage::MemoryChannelStore;

    struct Harness {
        pipeline: ChannelPipeline,
        transport: Arc<SimulatedTransport>,
        store: Arc<MemoryChannelStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryChannelStore::new());
        let transport = Arc::new(SimulatedTransport::new());
        let pipeline = ChannelPipeline::new(
            store.clone(),
            Arc::new(ExpressionEngine::new()),
            transport.clone(),
            &ServerConfig::default(),
        );
        Harness {
            pipeline,
            transport,
            store,
        }
    }

    fn scenario_channel() -> Channel {
        Channel::new(
            "c1",
            "ADT feed",
            SourceConfig::tcp("0.0.0.0", 6661, true),
            vec![DestinationConfig::http("http://downstream/in")],
        )
        .with_filter(FilterConfig::script(
            "if 'x' in message: _passed=True else: _passed=False",
        ))
        .with_transformer(TransformerConfig::script("_transformed = message"))
    }

    #[tokio::test]
    async fn scenario_message_passes_and_is_sent() {
        let h = harness();
        h.pipeline
            .create_channel_with_checks(scenario_channel())
            .await
            .unwrap();

        let result = h
            .pipeline
            .process_with_checks("c1", json!({"x": 1}))
            .await
            .unwrap();

        assert_eq!(result.status, ProcessingStatus::Success);
        assert_eq!(result.stage, PipelineStage::Done);
        assert_eq!(result.processed_message, Some(json!({"x": 1})));
        assert_eq!(result.original_message, Some(json!({"x": 1})));
        let outcomes = result.destination_results.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].destination_type, "http");
        assert_eq!(outcomes[0].status, DeliveryStatus::Sent);
        assert_eq!(outcomes[0].url.as_deref(), Some("http://downstream/in"));
        assert!(Uuid::parse_str(&result.process_id).is_ok());
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn scenario_message_without_key_is_filtered() {
        let h = harness();
        let result = h
            .pipeline
            .process(&scenario_channel(), json!({"y": 1}))
            .await;

        assert_eq!(result.status, ProcessingStatus::Filtered);
        assert_eq!(result.stage, PipelineStage::Filtered);
        assert!(result.destination_results.is_none());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn disabled_channel_short_circuits() {
        let h = harness();
        h.store
            .add(scenario_channel().with_enabled(false))
            .await
            .unwrap();

        let err = h
            .pipeline
            .process_with_checks("c1", json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Disabled { ref id } if id == "c1"));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_is_not_found() {
        let h = harness();
        let err = h
            .pipeline
            .process_with_checks("nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotFound { .. }));
    }

    #[tokio::test]
    async fn transformer_without_output_warns_and_passes_through() {
        let h = harness();
        let channel = Channel::new(
            "c2",
            "passthrough",
            SourceConfig::tcp("0.0.0.0", 6662, false),
            vec![DestinationConfig::tcp("lab", 7000, true)],
        )
        .with_transformer(TransformerConfig::script("pass"));

        let result = h.pipeline.process(&channel, json!("MSH|^~\\&|")).await;

        assert_eq!(result.status, ProcessingStatus::Success);
        assert_eq!(result.processed_message, Some(json!("MSH|^~\\&|")));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Transformer 0"));
    }

    #[tokio::test]
    async fn failing_transformer_halts_with_error() {
        let h = harness();
        let channel = scenario_channel()
            .with_transformer(TransformerConfig::script("_transformed = message['absent']"));

        let result = h.pipeline.process(&channel, json!({"x": 1})).await;

        assert_eq!(result.status, ProcessingStatus::Error);
        let message = result.message.unwrap();
        assert!(message.starts_with("Transformer 1 failed"), "{message}");
        assert!(message.contains("absent"));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn transformers_chain_in_order() {
        let h = harness();
        let channel = Channel::new(
            "c3",
            "chain",
            SourceConfig::tcp("0.0.0.0", 6663, false),
            vec![DestinationConfig::http("http://out")],
        )
        .with_transformer(TransformerConfig::script("_transformed = message + 1"))
        .with_transformer(TransformerConfig::script("_transformed = message * 10"));

        let result = h.pipeline.process(&channel, json!(1)).await;
        assert_eq!(result.processed_message, Some(json!(20)));
        assert_eq!(h.transport.sent()[0].payload, json!(20));
    }

    #[tokio::test]
    async fn duplicate_create_leaves_store_unchanged() {
        let h = harness();
        h.pipeline
            .create_channel_with_checks(scenario_channel())
            .await
            .unwrap();

        let mut other = scenario_channel();
        other.name = "impostor".to_string();
        let err = h
            .pipeline
            .create_channel_with_checks(other)
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::AlreadyExists { ref id } if id == "c1"));
        assert_eq!(h.store.len(), 1);
        assert_eq!(
            h.store.get_by_id("c1").await.unwrap().unwrap().name,
            "ADT feed"
        );
    }

    /// Memory store whose lookups yield, so racing creates interleave.
    struct YieldingStore(MemoryChannelStore);

    #[async_trait::async_trait]
    impl ChannelStore for YieldingStore {
        async fn get_by_id(&self, id: &str) -> ChannelResult<Option<Channel>> {
            tokio::task::yield_now().await;
            self.0.get_by_id(id).await
        }

        async fn get_all(&self) -> ChannelResult<Vec<Channel>> {
            self.0.get_all().await
        }

        async fn add(&self, channel: Channel) -> ChannelResult<Channel> {
            tokio::task::yield_now().await;
            self.0.add(channel).await
        }

        async fn update(&self, channel: Channel) -> ChannelResult<Channel> {
            self.0.update(channel).await
        }

        async fn delete(&self, id: &str) -> ChannelResult<bool> {
            self.0.delete(id).await
        }

        async fn count(&self) -> ChannelResult<usize> {
            self.0.count().await
        }
    }

    #[tokio::test]
    async fn racing_creates_with_one_id_admit_exactly_one() {
        let store = Arc::new(YieldingStore(MemoryChannelStore::new()));
        let pipeline = ChannelPipeline::new(
            store.clone(),
            Arc::new(ExpressionEngine::new()),
            Arc::new(SimulatedTransport::new()),
            &ServerConfig::default(),
        );
        let mut rival = scenario_channel();
        rival.name = "rival".to_string();

        let (first, second) = tokio::join!(
            pipeline.create_channel_with_checks(scenario_channel()),
            pipeline.create_channel_with_checks(rival),
        );

        let (winner, loser) = match (first, second) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            other => panic!("expected one success and one conflict, got {other:?}"),
        };
        assert!(matches!(loser, ChannelError::AlreadyExists { ref id } if id == "c1"));
        let stored = store.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(stored.name, winner.name);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_rejects_uncompilable_script() {
        let h = harness();
        let channel =
            scenario_channel().with_filter(FilterConfig::script("_passed = ((("));
        let err = h
            .pipeline
            .create_channel_with_checks(channel)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ChannelError::Validation { ref field, .. } if field == "filters[1]"),
            "got {err:?}"
        );
        assert!(h.store.is_empty());
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn processing_futures_are_send() {
        let h = harness();
        let channel = scenario_channel();
        assert_send(h.pipeline.process(&channel, json!({"x": 1})));
        assert_send(h.pipeline.process_with_checks("c1", json!({"x": 1})));
        assert_send(
            h.pipeline
                .dispatcher
                .dispatch("p1", "c1", &channel.destinations, &json!({})),
        );
    }

    #[tokio::test]
    async fn create_rejects_empty_id() {
        let h = harness();
        let mut channel = scenario_channel();
        channel.id = "  ".to_string();
        let err = h
            .pipeline
            .create_channel_with_checks(channel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Validation { ref field, .. } if field == "id"));
        assert!(h.store.is_empty());
    }
}
