//! In-memory [`ChannelStore`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.
//! Contents are lost on restart; suitable for tests and ephemeral deployments.

use async_trait::async_trait;
use conduit_core::{Channel, ChannelError, ChannelResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::traits::ChannelStore;

/// In-memory channel store keyed by channel id.
pub struct MemoryChannelStore {
    channels: DashMap<String, Channel>,
}

impl MemoryChannelStore {
    /// Creates a new, empty `MemoryChannelStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for MemoryChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn get_by_id(&self, id: &str) -> ChannelResult<Option<Channel>> {
        Ok(self.channels.get(id).map(|c| c.clone()))
    }

    async fn get_all(&self) -> ChannelResult<Vec<Channel>> {
        let mut all: Vec<Channel> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn add(&self, channel: Channel) -> ChannelResult<Channel> {
        match self.channels.entry(channel.id.clone()) {
            Entry::Occupied(_) => Err(ChannelError::already_exists(channel.id)),
            Entry::Vacant(slot) => {
                slot.insert(channel.clone());
                Ok(channel)
            }
        }
    }

    async fn update(&self, channel: Channel) -> ChannelResult<Channel> {
        match self.channels.get_mut(&channel.id) {
            Some(mut slot) => {
                *slot = channel.clone();
                Ok(channel)
            }
            None => Err(ChannelError::not_found(channel.id)),
        }
    }

    async fn delete(&self, id: &str) -> ChannelResult<bool> {
        Ok(self.channels.remove(id).is_some())
    }

    async fn count(&self) -> ChannelResult<usize> {
        Ok(self.channels.len())
    }
}
