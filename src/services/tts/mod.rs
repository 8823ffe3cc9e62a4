pub mod client;
pub mod prepare;
pub mod types;

pub use client::{HttpRemoteClient, RemoteClient, RemoteError};
pub use prepare::prepare_text;
pub use types::{JobSummary, QueueStatus, WorkerStatus};
