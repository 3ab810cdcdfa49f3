//! Channel management: create, read, update, delete, enable, disable, and
//! the checked processing entry point.

use std::sync::Arc;

use conduit_core::{Channel, ChannelError, ChannelResult, ProcessingResult};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::ChannelPipeline;

/// Management facade over a [`ChannelPipeline`] and its store.
#[derive(Clone)]
pub struct ChannelService {
    pipeline: Arc<ChannelPipeline>,
}

impl ChannelService {
    #[must_use]
    pub fn new(pipeline: Arc<ChannelPipeline>) -> Self {
        Self { pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    /// Creates a channel from an untyped payload.
    ///
    /// A UUID is assigned when the payload carries no `id`.
    ///
    /// # Errors
    ///
    /// Validation and configuration errors from [`Channel::from_payload`],
    /// or [`ChannelError::AlreadyExists`] when the id is taken.
    pub async fn create(&self, payload: &Value) -> ChannelResult<Channel> {
        let channel = match payload {
            Value::Object(map) if matches!(map.get("id"), None | Some(Value::Null)) => {
                let mut map = map.clone();
                map.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
                Channel::from_payload(&Value::Object(map))?
            }
            other => Channel::from_payload(other)?,
        };
        let created = self.pipeline.create_channel_with_checks(channel).await?;
        info!(channel_id = %created.id, name = %created.name, "channel created");
        Ok(created)
    }

    /// # Errors
    ///
    /// [`ChannelError::NotFound`] if no channel has this id.
    pub async fn get(&self, id: &str) -> ChannelResult<Channel> {
        self.pipeline
            .store()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ChannelError::not_found(id))
    }

    /// # Errors
    ///
    /// Store failures only.
    pub async fn list(&self) -> ChannelResult<Vec<Channel>> {
        self.pipeline.store().get_all().await
    }

    /// Number of stored channels.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn count(&self) -> ChannelResult<usize> {
        self.pipeline.store().count().await
    }

    /// Merges `patch` into the stored channel. The id never changes.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotFound`], or validation errors for the merged
    /// channel and its scripts.
    pub async fn update(&self, id: &str, patch: &Value) -> ChannelResult<Channel> {
        let merged = self.get(id).await?.merge_patch(patch)?;
        self.pipeline.check_scripts(&merged)?;
        let updated = self.pipeline.store().update(merged).await?;
        info!(channel_id = %updated.id, "channel updated");
        Ok(updated)
    }

    /// # Errors
    ///
    /// [`ChannelError::NotFound`] if no channel has this id.
    pub async fn delete(&self, id: &str) -> ChannelResult<()> {
        if !self.pipeline.store().delete(id).await? {
            return Err(ChannelError::not_found(id));
        }
        info!(channel_id = %id, "channel deleted");
        Ok(())
    }

    /// Enables a channel. Enabling an enabled channel is a no-op.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotFound`] if no channel has this id.
    pub async fn enable(&self, id: &str) -> ChannelResult<Channel> {
        self.set_enabled(id, true).await
    }

    /// Disables a channel. Disabling a disabled channel is a no-op.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotFound`] if no channel has this id.
    pub async fn disable(&self, id: &str) -> ChannelResult<Channel> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> ChannelResult<Channel> {
        let channel = self.get(id).await?;
        if channel.enabled == enabled {
            return Ok(channel);
        }
        let updated = self
            .pipeline
            .store()
            .update(channel.with_enabled(enabled))
            .await?;
        info!(channel_id = %id, enabled, "channel state changed");
        Ok(updated)
    }

    /// Processes a message through an enabled channel.
    ///
    /// # Errors
    ///
    /// See [`ChannelPipeline::process_with_checks`].
    pub async fn process(&self, id: &str, message: Value) -> ChannelResult<ProcessingResult> {
        self.pipeline.process_with_checks(id, message).await
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{ExpressionEngine, ProcessingStatus};
    use serde_json::json;

    use super::*;
    use crate::pipeline::SimulatedTransport;
    use crate::service::config::ServerConfig;
    use crate::storage::MemoryChannelStore;

    fn service() -> ChannelService {
        let pipeline = ChannelPipeline::new(
            Arc::new(MemoryChannelStore::new()),
            Arc::new(ExpressionEngine::new()),
            Arc::new(SimulatedTransport::new()),
            &ServerConfig::default(),
        );
        ChannelService::new(Arc::new(pipeline))
    }

    fn payload() -> Value {
        json!({
            "id": "c1",
            "name": "  ADT feed  ",
            "source": {"type": "tcp", "port": 6661, "use_mllp": true},
            "filters": [{"type": "python_script", "script": "_passed = 'x' in message"}],
            "destinations": [{"type": "http", "url": "http://downstream/in"}]
        })
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let svc = service();
        let created = svc.create(&payload()).await.unwrap();
        assert_eq!(created.name, "ADT feed");
        assert_eq!(svc.get("c1").await.unwrap(), created);
        assert_eq!(svc.list().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn create_assigns_id_when_absent() {
        let svc = service();
        let mut body = payload();
        body.as_object_mut().unwrap().remove("id");
        let created = svc.create(&body).await.unwrap();
        assert!(Uuid::parse_str(&created.id).is_ok());
    }

    #[tokio::test]
    async fn create_rejects_empty_destinations() {
        let svc = service();
        let mut body = payload();
        body["destinations"] = json!([]);
        let err = svc.create(&body).await.unwrap_err();
        assert!(matches!(err, ChannelError::Validation { ref field, .. } if field == "destinations"));
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let svc = service();
        svc.create(&payload()).await.unwrap();

        let once = svc.disable("c1").await.unwrap();
        let twice = svc.disable("c1").await.unwrap();
        assert!(!once.enabled);
        assert_eq!(once, twice);

        let once = svc.enable("c1").await.unwrap();
        let twice = svc.enable("c1").await.unwrap();
        assert!(once.enabled);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let svc = service();
        svc.create(&payload()).await.unwrap();
        let updated = svc
            .update("c1", &json!({"id": "other", "description": "admissions"}))
            .await
            .unwrap();
        assert_eq!(updated.id, "c1");
        assert_eq!(updated.description.as_deref(), Some("admissions"));
        assert_eq!(updated.filters.len(), 1);
        assert!(svc.get("other").await.is_err());
    }

    #[tokio::test]
    async fn scripts_are_compiled_on_create_and_update() {
        let svc = service();
        let mut body = payload();
        body["filters"] = json!([{"type": "script", "script": "_passed = ((("}]);
        let err = svc.create(&body).await.unwrap_err();
        assert!(matches!(err, ChannelError::Validation { ref field, .. } if field == "filters[0]"));
        assert_eq!(svc.count().await.unwrap(), 0);

        svc.create(&payload()).await.unwrap();
        let err = svc
            .update(
                "c1",
                &json!({"transformers": [{"type": "script", "script": "_transformed = ("}]}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Validation { ref field, .. } if field == "transformers[0]"));
        assert!(svc.get("c1").await.unwrap().transformers.is_empty());
        assert_eq!(svc.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let svc = service();
        svc.create(&payload()).await.unwrap();
        svc.delete("c1").await.unwrap();
        assert!(matches!(
            svc.delete("c1").await.unwrap_err(),
            ChannelError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn process_respects_enabled_flag() {
        let svc = service();
        svc.create(&payload()).await.unwrap();
        let result = svc.process("c1", json!({"x": 1})).await.unwrap();
        assert_eq!(result.status, ProcessingStatus::Success);

        svc.disable("c1").await.unwrap();
        assert!(matches!(
            svc.process("c1", json!({"x": 1})).await.unwrap_err(),
            ChannelError::Disabled { .. }
        ));
    }
}
