//! Channel processing pipeline.
//!
//! 1. **Stages** (`stage`): filter and transformer scripts on the blocking pool
//! 2. **Transports** (`transport`): simulated and network destination sends
//! 3. **Dispatch** (`dispatch`): ordered, bounded fan-out to destinations
//! 4. **Processor** (`processor`): the per-message state machine and checked entry points

pub mod dispatch;
pub mod processor;
pub mod stage;
pub mod transport;

pub use dispatch::DestinationDispatcher;
pub use processor::ChannelPipeline;
pub use stage::{FilterVerdict, ScriptStage, StageError, TransformOutcome};
pub use transport::{NetworkTransport, SentMessage, SimulatedTransport, TransportService};
