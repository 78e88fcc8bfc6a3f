//! Reelsmith Job Model
//!
//! Defines the data contracts passed between pipeline components:
//! - **Job:** One assembly request, its stage and terminal result
//! - **Source:** Where a visual or audio asset comes from
//! - **Output:** Target container and encoding geometry
//! - **Trim:** The reconciled playable interval of each track
//! - **Failure:** The caller-facing failure taxonomy
//!
//! All durations are in seconds, relative to each track's own zero point.

pub mod failure;
pub mod job;
pub mod output;
pub mod source;
pub mod trim;

pub use failure::*;
pub use job::*;
pub use output::*;
pub use source::*;
pub use trim::*;
