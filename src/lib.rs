pub mod audio;
pub mod config;
pub mod kernel;
pub mod services;
pub mod store;

pub use config::ForgeConfig;
pub use kernel::segment::{Catalog, Segment, SegmentKind};
pub use kernel::{Orchestrator, RunError, RunReport};
