//! Operation orchestration
//!
//! - [`Orchestrator`]: FIFO-admitted, concurrency-capped execution
//! - [`TargetRegistry`]: registered targets and their adapter factories
//! - [`OperationEvent`]: state transitions published to subscribers

mod gate;

pub mod events;
pub mod registry;
pub mod service;

pub use events::OperationEvent;
pub use registry::{TargetRegistration, TargetRegistry};
pub use service::{Orchestrator, ShutdownReport};
