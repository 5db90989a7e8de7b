//! Reelcache-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across reelcache:
//!
//! - **Typed IDs**: UUID wrapper for playback sessions
//! - **Core Types**: Content information, dimensions, and video gravity
//! - **Path Utilities**: Extension normalization for cached video files
//! - **Error Handling**: Cache, fetch, and playback error taxonomies
//!
//! # Examples
//!
//! ```
//! use reelcache_common::{Dimensions, VideoGravity, SessionId};
//! use reelcache_common::paths::normalize_extension;
//!
//! let session_id = SessionId::new();
//! assert!(!session_id.to_string().is_empty());
//!
//! let portrait = Dimensions::new(720, 1280);
//! assert_eq!(portrait.gravity(), VideoGravity::ResizeAspectFill);
//!
//! assert_eq!(normalize_extension(Some(".MP4"), "mp4"), "mp4");
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{CacheError, CacheResult, FetchError, PlaybackError};
pub use ids::*;
pub use types::*;
