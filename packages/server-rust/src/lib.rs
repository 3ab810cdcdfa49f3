//! Conduit server: channel storage, the processing pipeline, destination
//! dispatch, and the HTTP management surface.

pub mod logging;
pub mod network;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod traits;

pub use network::{NetworkConfig, NetworkModule};
pub use pipeline::{ChannelPipeline, DestinationDispatcher, ScriptStage};
pub use service::{ChannelService, ServerConfig};
pub use traits::{ChannelStore, Transport};
