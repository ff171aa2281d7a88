//! Workspace umbrella crate.
//!
//! Host applications can depend on `datmusic-workspace` and enable the
//! documented features instead of wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
