//! Core value types shared between the cache store and the streaming pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Response metadata for a remote asset, as announced by the server.
///
/// Handed to the player when it asks for content information before reading
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentInfo {
    /// MIME type from the response headers.
    pub content_type: Option<String>,
    /// Expected length of the body, if the server announced one.
    pub content_length: Option<u64>,
    /// Whether the player may issue arbitrary byte-range reads.
    pub byte_range_access_supported: bool,
}

impl ContentInfo {
    /// Build content info from response headers.
    ///
    /// Byte-range access is always advertised: the pipeline serves ranges from
    /// its own buffer, whatever the origin supports.
    pub fn new(content_type: Option<String>, content_length: Option<u64>) -> Self {
        Self {
            content_type,
            content_length,
            byte_range_access_supported: true,
        }
    }
}

/// Width and height of a feed item's video, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Portrait videos fill the screen, everything else is letterboxed.
    pub fn gravity(&self) -> VideoGravity {
        if self.width < self.height {
            VideoGravity::ResizeAspectFill
        } else {
            VideoGravity::ResizeAspect
        }
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// How the player scales video into its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoGravity {
    /// Preserve aspect ratio, fit within bounds.
    ResizeAspect,
    /// Preserve aspect ratio, fill bounds (cropping).
    ResizeAspectFill,
}

impl fmt::Display for VideoGravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResizeAspect => write!(f, "resize_aspect"),
            Self::ResizeAspectFill => write!(f, "resize_aspect_fill"),
        }
    }
}
