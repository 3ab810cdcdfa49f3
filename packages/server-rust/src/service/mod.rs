//! Channel management and delivery framework.
//!
//! 1. **Configuration** (`config`): pipeline timeouts, fan-out width, script limits
//! 2. **Management** (`channels`): channel CRUD and the checked process entry point
//! 3. **Deliveries** (`delivery`): the delivery request and its deadline-bounded
//!    tower service

pub mod channels;
pub mod config;
pub mod delivery;

// Re-export key types for convenient access.
pub use channels::ChannelService;
pub use config::ServerConfig;
pub use delivery::{delivery_service, Delivery, DeliveryContext, DeliveryService, DispatchError};
