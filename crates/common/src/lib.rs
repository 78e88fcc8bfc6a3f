//! Reelsmith Common Utilities
//!
//! Shared infrastructure for all Reelsmith crates:
//! - Error types and result aliases
//! - Job clock and wall-clock budgets
//! - Tracing/logging initialization
//! - Configuration loading
//! - The scratch storage trait shared by writers of transient files

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod scratch;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use scratch::ScratchArea;
