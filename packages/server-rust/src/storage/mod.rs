//! Channel persistence for the Conduit server.
//!
//! The [`ChannelStore`](crate::traits::ChannelStore) port has two backends:
//!
//! - [`MemoryChannelStore`]: `DashMap`-backed, volatile
//! - `RedbChannelStore` (feature `redb`): one JSON row per channel in an
//!   embedded database file
//!
//! [`open_store`] picks the backend from a [`StorageBackend`].

pub mod engines;
pub mod factory;

pub use engines::*;
pub use factory::{open_store, StorageBackend};
