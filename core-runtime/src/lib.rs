//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the data crates:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! `core-data` and `core-downloader` depend on this crate for the
//! configuration they are built from, the logging conventions they follow and
//! the broadcast bus they publish observability events on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
