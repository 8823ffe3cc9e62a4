pub mod error;
pub mod gate;
pub mod lease;
pub mod monitor;
pub mod orchestrator;
pub mod recovery;
pub mod segment;
pub mod submitter;
pub mod telemetry;
pub mod time;

pub use error::{RunError, RunResult};
pub use orchestrator::{Orchestrator, RunReport};
