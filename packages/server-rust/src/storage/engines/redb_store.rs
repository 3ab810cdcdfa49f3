//! Embedded file-backed [`ChannelStore`] using `redb`.
//!
//! Each channel is one row in the `channels` table: the key is the channel
//! id, the value is the channel serialized as JSON. Rows are decoded through
//! the lenient configuration resolvers, so a record written by a newer build
//! with an unknown destination type still loads.
//!
//! `redb` is synchronous; every operation runs on the blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::{Channel, ChannelError, ChannelResult};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::traits::ChannelStore;

const CHANNELS: TableDefinition<&str, &str> = TableDefinition::new("channels");

/// Channel store persisted to a single `redb` database file.
#[derive(Clone)]
pub struct RedbChannelStore {
    db: Arc<Database>,
}

impl RedbChannelStore {
    /// Opens (or creates) the database at `path` and ensures the table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open channel database at {}", path.display()))?;
        let txn = db.begin_write()?;
        txn.open_table(CHANNELS)?;
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> ChannelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(ChannelError::store)?
            .map_err(ChannelError::Store)
    }
}

fn decode(id: &str, row: &str) -> anyhow::Result<Channel> {
    serde_json::from_str(row).with_context(|| format!("corrupt channel row '{id}'"))
}

fn encode(channel: &Channel) -> anyhow::Result<String> {
    serde_json::to_string(channel).context("failed to serialize channel")
}

#[async_trait]
impl ChannelStore for RedbChannelStore {
    async fn get_by_id(&self, id: &str) -> ChannelResult<Option<Channel>> {
        let id = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(CHANNELS)?;
            let row = table.get(id.as_str())?;
            row.map(|guard| decode(&id, guard.value())).transpose()
        })
        .await
    }

    async fn get_all(&self) -> ChannelResult<Vec<Channel>> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(CHANNELS)?;
            let mut channels = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                channels.push(decode(key.value(), value.value())?);
            }
            Ok(channels)
        })
        .await
    }

    async fn add(&self, channel: Channel) -> ChannelResult<Channel> {
        let row = encode(&channel).map_err(ChannelError::Store)?;
        let added = self
            .blocking(move |db| {
                // redb serializes write transactions, so check and insert are atomic.
                let txn = db.begin_write()?;
                let taken = {
                    let mut table = txn.open_table(CHANNELS)?;
                    let taken = table.get(channel.id.as_str())?.is_some();
                    if !taken {
                        table.insert(channel.id.as_str(), row.as_str())?;
                    }
                    taken
                };
                if taken {
                    txn.abort()?;
                    return Ok(Err(channel.id));
                }
                txn.commit()?;
                Ok(Ok(channel))
            })
            .await?;
        added.map_err(ChannelError::already_exists)
    }

    async fn update(&self, channel: Channel) -> ChannelResult<Channel> {
        let row = encode(&channel).map_err(ChannelError::Store)?;
        let updated = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let exists = {
                    let mut table = txn.open_table(CHANNELS)?;
                    let exists = table.get(channel.id.as_str())?.is_some();
                    if exists {
                        table.insert(channel.id.as_str(), row.as_str())?;
                    }
                    exists
                };
                txn.commit()?;
                Ok(if exists { Ok(channel) } else { Err(channel.id) })
            })
            .await?;
        updated.map_err(ChannelError::not_found)
    }

    async fn delete(&self, id: &str) -> ChannelResult<bool> {
        let id = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let removed = txn.open_table(CHANNELS)?.remove(id.as_str())?.is_some();
            txn.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn count(&self) -> ChannelResult<usize> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let rows = txn.open_table(CHANNELS)?.len()?;
            Ok(usize::try_from(rows)?)
        })
        .await
    }
}
