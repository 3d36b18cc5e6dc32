//! Persona Dispatcher (spec §4.5), Persona Request Executor (§4.6), and
//! the Information-Request Loop (§4.7).

pub mod dispatcher;
pub mod executor;
pub mod info_request;
pub mod language_policy;
pub mod prompt;
pub mod retry;

pub use dispatcher::{DispatcherConfig, PersonaDispatcherLoop};
pub use executor::{ExecutionOutcome, ExecutorInput, PersonaRequestExecutor};
pub use retry::RetrySchedule;
