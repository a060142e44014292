pub mod commands;
pub mod dispatcher;
pub mod runtime;

pub use commands::{CommandEnvelope, LibraryCommand};
pub use dispatcher::{DispatchError, Dispatcher};
pub use runtime::{AggregateRuntime, ExecutionOutcome, RuntimeConfig};
