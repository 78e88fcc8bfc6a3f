//! Reelsmith Asset Fetch
//!
//! Copies a visual or audio asset into a job's scratch area. Remote sources
//! are streamed chunk by chunk straight to disk; local sources are copied
//! through a fixed-size buffer. Size and time limits abort the transfer and
//! remove the partial file.

pub mod error;
pub mod fetcher;

pub use error::FetchError;
pub use fetcher::{AssetFetcher, LocalAsset};
pub use reelsmith_common::scratch::ScratchArea;
