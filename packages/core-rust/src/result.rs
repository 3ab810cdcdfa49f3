//! Processing result shapes returned to the calling layer.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the JSON form
//! matches the wire contract (`processedMessage`, `destinationResults`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DestinationConfig;

/// Overall outcome of one processing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Filtered,
    Error,
}

/// States of a single processing call.
///
/// `Start -> Filtering -> Transforming -> Dispatching -> Done`, with early
/// exits to `Filtered` or `Error` from the filtering and transforming stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Start,
    Filtering,
    Transforming,
    Dispatching,
    Done,
    Filtered,
    Error,
}

impl PipelineStage {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Filtered | Self::Error)
    }
}

/// Per-destination delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Skipped,
    Error,
    Timeout,
}

/// Outcome of delivering the processed message to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationOutcome {
    pub destination_type: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_framing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DestinationOutcome {
    /// Creates an outcome carrying the destination's identifying fields.
    #[must_use]
    pub fn describe(destination: &DestinationConfig, status: DeliveryStatus) -> Self {
        let mut outcome = Self {
            destination_type: destination.kind().to_string(),
            status,
            url: None,
            method: None,
            host: None,
            port: None,
            use_framing: None,
            error: None,
        };
        match destination {
            DestinationConfig::Http(http) => {
                outcome.url = Some(http.url.clone());
                outcome.method = Some(http.method.as_str().to_string());
            }
            DestinationConfig::Tcp(tcp) => {
                outcome.host = Some(tcp.host.clone());
                outcome.port = Some(tcp.port);
                outcome.use_framing = Some(tcp.use_framing);
            }
            DestinationConfig::Unrecognized { .. } => {}
        }
        outcome
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Structured result of processing one message through a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub process_id: String,
    pub status: ProcessingStatus,
    /// Terminal stage of the call.
    pub stage: PipelineStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_results: Option<Vec<DestinationOutcome>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    /// Completed run: the message reached the dispatcher.
    #[must_use]
    pub fn success(processed: Value, destination_results: Vec<DestinationOutcome>) -> Self {
        Self {
            process_id: String::new(),
            status: ProcessingStatus::Success,
            stage: PipelineStage::Done,
            message: None,
            original_message: None,
            processed_message: Some(processed),
            destination_results: Some(destination_results),
            warnings: Vec::new(),
            processing_time_ms: 0,
        }
    }

    /// A filter rejected the message.
    #[must_use]
    pub fn filtered(message: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Filtered,
            stage: PipelineStage::Filtered,
            message: Some(message.into()),
            ..Self::success(Value::Null, Vec::new()).halted()
        }
    }

    /// A stage failed; processing stopped.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Error,
            stage: PipelineStage::Error,
            message: Some(message.into()),
            ..Self::success(Value::Null, Vec::new()).halted()
        }
    }

    fn halted(mut self) -> Self {
        self.processed_message = None;
        self.destination_results = None;
        self
    }

    /// Number of destinations that reported `sent`.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.destination_results
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|o| o.status == DeliveryStatus::Sent)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn http_outcome_serializes_wire_shape() {
        let outcome =
            DestinationOutcome::describe(&DestinationConfig::http("http://out"), DeliveryStatus::Sent);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"destinationType": "http", "status": "sent", "url": "http://out", "method": "POST"})
        );
    }

    #[test]
    fn tcp_outcome_carries_endpoint_and_error() {
        let outcome = DestinationOutcome::describe(
            &DestinationConfig::tcp("lab", 6661, true),
            DeliveryStatus::Error,
        )
        .with_error("connection refused");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["destinationType"], "tcp");
        assert_eq!(value["status"], "error");
        assert_eq!(value["port"], 6661);
        assert_eq!(value["useFraming"], true);
        assert_eq!(value["error"], "connection refused");
    }

    #[test]
    fn filtered_result_omits_dispatch_fields() {
        let result = ProcessingResult::filtered("rejected by filter 0");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "filtered");
        assert_eq!(value["stage"], "filtered");
        assert!(value.get("destinationResults").is_none());
        assert!(value.get("processedMessage").is_none());
        assert!(value.get("warnings").is_none());
    }

    #[test]
    fn success_counts_sent_destinations() {
        let sent =
            DestinationOutcome::describe(&DestinationConfig::http("http://a"), DeliveryStatus::Sent);
        let failed =
            DestinationOutcome::describe(&DestinationConfig::http("http://b"), DeliveryStatus::Error);
        let result = ProcessingResult::success(json!({"x": 1}), vec![sent.clone(), failed, sent]);
        assert_eq!(result.sent_count(), 2);
        assert!(result.stage.is_terminal());
    }
}
