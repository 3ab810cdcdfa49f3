use async_trait::async_trait;
use conduit_core::{Channel, ChannelResult, DestinationConfig};
use serde_json::Value;

use crate::service::delivery::DispatchError;

/// Sends a processed message to one destination.
/// Implementations: simulated (records sends, default), network (HTTP and TCP).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `payload` to `destination`.
    ///
    /// Implementations should not apply their own overall timeout; the
    /// delivery stack bounds each call.
    async fn send(&self, destination: &DestinationConfig, payload: &Value)
        -> Result<(), DispatchError>;
}

/// Pluggable persistence for channel configurations.
/// Implementations: memory (tests and ephemeral deployments), `redb` (embedded file).
///
/// Backend failures surface as [`conduit_core::ChannelError::Store`]. Returned
/// channels always carry fully resolved configuration variants.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Load a single channel by id.
    async fn get_by_id(&self, id: &str) -> ChannelResult<Option<Channel>>;

    /// Load every stored channel, ordered by id.
    async fn get_all(&self) -> ChannelResult<Vec<Channel>>;

    /// Insert a new channel.
    ///
    /// The existence check and the insert are one atomic step: of two
    /// concurrent adds with the same id, exactly one succeeds and the other
    /// fails with [`conduit_core::ChannelError::AlreadyExists`].
    async fn add(&self, channel: Channel) -> ChannelResult<Channel>;

    /// Replace an existing channel.
    ///
    /// Fails with [`conduit_core::ChannelError::NotFound`] if no channel has
    /// the same id.
    async fn update(&self, channel: Channel) -> ChannelResult<Channel>;

    /// Remove a channel. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> ChannelResult<bool>;

    /// Number of stored channels, without decoding them.
    async fn count(&self) -> ChannelResult<usize>;
}
