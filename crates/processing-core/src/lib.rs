//! Reelsmith Processing Core
//!
//! Pure timing decisions for media assembly:
//! - **Reconcile:** Compute the common playable duration of a visual and an
//!   audio track and the interval each must be trimmed to
//!
//! This crate is pure computation: no I/O, no process state.
//! All inputs are data; all outputs are data.

pub mod reconcile;

pub use reconcile::{reconcile, ReconcileError, Reconciler, DEFAULT_EPSILON_SECS};
