//! Filter and transformer execution on top of a [`ScriptEngine`].
//!
//! Scripts are CPU-bound, so each run moves to the blocking thread pool and is
//! bounded by an outer `tokio::time::timeout` in addition to the engine's own
//! step budget and deadline.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::script::{MESSAGE_VAR, PASSED_VAR, TRANSFORMED_VAR};
use conduit_core::{
    Bindings, Channel, ChannelError, ChannelResult, FilterConfig, ScriptEngine, ScriptError,
    ScriptLimits, TransformerConfig,
};
use serde_json::Value;

/// Why a script stage could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("unsupported {family} type '{kind}'")]
    Unsupported { family: &'static str, kind: String },
    #[error("script task aborted: {message}")]
    Aborted { message: String },
}

/// Outcome of a filter run.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    /// Continue with this message (possibly rebound by the filter).
    Pass(Value),
    Reject,
}

/// Outcome of a transformer run.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Transformed(Value),
    /// The script did not set `_transformed`; the input is returned as is.
    Unchanged(Value),
}

/// Runs filter and transformer scripts under the configured limits.
#[derive(Clone)]
pub struct ScriptStage {
    engine: Arc<dyn ScriptEngine>,
    limits: ScriptLimits,
    timeout: Duration,
}

impl ScriptStage {
    #[must_use]
    pub fn new(engine: Arc<dyn ScriptEngine>, limits: ScriptLimits, timeout: Duration) -> Self {
        Self {
            engine,
            limits,
            timeout,
        }
    }

    /// Compiles every filter and transformer script of `channel` without
    /// running any of them.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Validation`] for the first script the engine rejects,
    /// with `field` set to its position, e.g. `transformers[1]`.
    pub fn check_channel(&self, channel: &Channel) -> ChannelResult<()> {
        let filters = channel.filters.iter().enumerate().filter_map(|(i, filter)| match filter {
            FilterConfig::Script(script) => Some((format!("filters[{i}]"), script.script.as_str())),
            FilterConfig::Unrecognized { .. } => None,
        });
        let transformers =
            channel
                .transformers
                .iter()
                .enumerate()
                .filter_map(|(i, transformer)| match transformer {
                    TransformerConfig::Script(script) => {
                        Some((format!("transformers[{i}]"), script.script.as_str()))
                    }
                    TransformerConfig::Unrecognized { .. } => None,
                });
        for (field, script) in filters.chain(transformers) {
            self.engine
                .check(script)
                .map_err(|err| ChannelError::validation(field, err.to_string()))?;
        }
        Ok(())
    }

    /// Runs a filter. Only a boolean `true` in `_passed` lets the message through.
    ///
    /// # Errors
    ///
    /// Returns the script failure, a timeout, or `Unsupported` for an
    /// unrecognized filter type.
    pub async fn filter(
        &self,
        filter: &FilterConfig,
        message: Value,
    ) -> Result<FilterVerdict, StageError> {
        let script = match filter {
            FilterConfig::Script(script) => script.script.clone(),
            FilterConfig::Unrecognized { kind, .. } => {
                return Err(StageError::Unsupported {
                    family: FilterConfig::FAMILY,
                    kind: kind.clone(),
                })
            }
        };
        let mut out = self.execute(script, message).await?;
        if out.get(PASSED_VAR) == Some(&Value::Bool(true)) {
            Ok(FilterVerdict::Pass(
                out.remove(MESSAGE_VAR).unwrap_or_default(),
            ))
        } else {
            Ok(FilterVerdict::Reject)
        }
    }

    /// Runs a transformer and returns its `_transformed` output.
    ///
    /// # Errors
    ///
    /// Same as [`ScriptStage::filter`].
    pub async fn transform(
        &self,
        transformer: &TransformerConfig,
        message: Value,
    ) -> Result<TransformOutcome, StageError> {
        let script = match transformer {
            TransformerConfig::Script(script) => script.script.clone(),
            TransformerConfig::Unrecognized { kind, .. } => {
                return Err(StageError::Unsupported {
                    family: TransformerConfig::FAMILY,
                    kind: kind.clone(),
                })
            }
        };
        let mut out = self.execute(script, message.clone()).await?;
        Ok(match out.remove(TRANSFORMED_VAR) {
            Some(transformed) => TransformOutcome::Transformed(transformed),
            None => TransformOutcome::Unchanged(message),
        })
    }

    async fn execute(&self, script: String, message: Value) -> Result<Bindings, StageError> {
        let engine = Arc::clone(&self.engine);
        let limits = self.limits.clone();
        let mut bindings = Bindings::new();
        bindings.insert(MESSAGE_VAR.to_string(), message);

        let task = tokio::task::spawn_blocking(move || engine.run(&script, bindings, &limits));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(StageError::Script),
            Ok(Err(join)) => Err(StageError::Aborted {
                message: join.to_string(),
            }),
            Err(_elapsed) => Err(StageError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::ExpressionEngine;
    use serde_json::json;

    use super::*;

    fn stage() -> ScriptStage {
        ScriptStage::new(
            Arc::new(ExpressionEngine::new()),
            ScriptLimits::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn filter_passes_only_on_boolean_true() {
        let stage = stage();
        let verdict = stage
            .filter(&FilterConfig::script("_passed = True"), json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(verdict, FilterVerdict::Pass(json!({"a": 1})));

        for script in ["_passed = 1", "_passed = 'yes'", "x = 1"] {
            let verdict = stage
                .filter(&FilterConfig::script(script), json!({}))
                .await
                .unwrap();
            assert_eq!(verdict, FilterVerdict::Reject, "script {script:?}");
        }
    }

    #[tokio::test]
    async fn filter_may_rebind_message() {
        let verdict = stage()
            .filter(
                &FilterConfig::script("message['seen'] = True\n_passed = True"),
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(verdict, FilterVerdict::Pass(json!({"seen": true})));
    }

    #[tokio::test]
    async fn transformer_without_output_is_unchanged() {
        let outcome = stage()
            .transform(
                &TransformerConfig::script("message['lost'] = 1"),
                json!({"a": 1}),
            )
            .await
            .unwrap();
        assert_eq!(outcome, TransformOutcome::Unchanged(json!({"a": 1})));
    }

    #[tokio::test]
    async fn raising_script_is_an_error() {
        let err = stage()
            .transform(
                &TransformerConfig::script("_transformed = message['missing']"),
                json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Script(ScriptError::Runtime { .. })));
    }

    #[tokio::test]
    async fn unrecognized_filter_is_unsupported() {
        let filter: FilterConfig =
            serde_json::from_value(json!({"type": "lua", "code": "return true"})).unwrap();
        let err = stage().filter(&filter, json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "unsupported filter type 'lua'");
    }

    #[test]
    fn check_channel_names_the_broken_script() {
        use conduit_core::{DestinationConfig, SourceConfig};

        let channel = Channel::new(
            "c1",
            "ADT feed",
            SourceConfig::tcp("0.0.0.0", 6661, true),
            vec![DestinationConfig::http("http://downstream/in")],
        )
        .with_filter(FilterConfig::script("_passed = True"))
        .with_transformer(TransformerConfig::script("_transformed = message"))
        .with_transformer(TransformerConfig::script("_transformed = ((("));

        let err = stage().check_channel(&channel).unwrap_err();
        assert!(
            matches!(err, ChannelError::Validation { ref field, .. } if field == "transformers[1]"),
            "got {err:?}"
        );

        let healthy = Channel {
            transformers: Vec::new(),
            ..channel
        };
        assert!(stage().check_channel(&healthy).is_ok());
    }

    /// Engine that blocks longer than any reasonable stage timeout.
    struct SleepyEngine;

    impl ScriptEngine for SleepyEngine {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn check(&self, _script: &str) -> Result<(), ScriptError> {
            Ok(())
        }

        fn run(
            &self,
            _script: &str,
            bindings: Bindings,
            _limits: &ScriptLimits,
        ) -> Result<Bindings, ScriptError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(bindings)
        }
    }

    #[tokio::test]
    async fn outer_timeout_bounds_the_stage() {
        let stage = ScriptStage::new(
            Arc::new(SleepyEngine),
            ScriptLimits::default(),
            Duration::from_millis(20),
        );
        let err = stage
            .filter(&FilterConfig::script("_passed = True"), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, StageError::Timeout { timeout_ms: 20 });
        assert_eq!(err.to_string(), "timed out after 20ms");
    }
}
