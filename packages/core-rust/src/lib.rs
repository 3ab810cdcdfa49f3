//! Conduit Core — channel model, configuration variants, processing results,
//! and the script engine used by filter and transformer stages.

pub mod channel;
pub mod config;
pub mod error;
pub mod result;
pub mod script;
pub mod traits;

pub use channel::{Channel, MAX_DESCRIPTION_LEN, MAX_NAME_LEN};
pub use config::{
    DestinationConfig, FilterConfig, HttpDestination, HttpMethod, HttpSource, ScriptFilter,
    ScriptTransformer, SourceConfig, TcpDestination, TcpSource, TransformerConfig,
};
pub use error::{ChannelError, ChannelResult, ConfigurationError};
pub use result::{
    DeliveryStatus, DestinationOutcome, PipelineStage, ProcessingResult, ProcessingStatus,
};
pub use script::{Bindings, ExpressionEngine, ScriptError, ScriptLimits};
pub use traits::ScriptEngine;
