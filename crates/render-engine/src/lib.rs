//! Reelsmith Render Engine
//!
//! Opens fetched tracks, applies a trim plan, burns optional overlay text
//! and encodes the finished video with a bounded encoding profile.
//!
//! # Pipeline Architecture
//!
//! ```text
//! visual.mp4 ──┐
//!              ├── Trim (input seek, -t)
//! trim plan ───┘         │
//!                        ├── Scale/Pad/FPS
//! audio.mp3 ──┐          │
//!             ├── Trim   ├── Subtitle Burn (drawtext, textfile)
//! trim plan ──┘    │     │
//!                  ▼     ▼
//!             Encode (profile: codec, preset, thread cap)
//!                        │
//!                        ▼
//!                   output.{mp4,webm}
//! ```

pub mod backend;
pub mod compositor;
pub mod error;
pub mod ffmpeg;
pub mod filter;
pub mod profile;

pub use backend::*;
pub use compositor::{CompositionJob, Compositor, OutputAsset};
pub use error::CompositeError;
pub use ffmpeg::FfmpegBackend;
pub use profile::{EncodeProfile, MemoryPressure};
