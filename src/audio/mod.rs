pub mod assembler;
pub mod timeline;

pub use assembler::{Assembler, AssemblyError, AssemblySettings};
pub use timeline::{Chapter, SilenceGap, Timeline, TimelineEntry, TimelineError};
