//! Reelcache - streaming video cache and playback core
//!
//! This library crate exposes the pipeline to the binary and to integration tests.

pub mod config;
pub mod headless;
pub mod streaming;
