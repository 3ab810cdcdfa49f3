//! Concrete [`ChannelStore`](crate::traits::ChannelStore) backends.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

pub use memory::MemoryChannelStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbChannelStore;
