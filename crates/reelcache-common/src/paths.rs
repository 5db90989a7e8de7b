//! Path utilities for cached video files.
//!
//! Cached files are named `{key}.{extension}`. The extension comes from the
//! feed item and is normalized here so lookups and stores always agree on the
//! same file name.

/// List of video file extensions the cache recognizes.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "ts"];

/// Normalize a file extension: strip a leading dot, trim, lowercase.
///
/// Falls back to `default` when the extension is missing, empty, or contains
/// characters that cannot appear in a cache file name.
///
/// # Examples
///
/// ```
/// use reelcache_common::paths::normalize_extension;
///
/// assert_eq!(normalize_extension(Some("MP4"), "mp4"), "mp4");
/// assert_eq!(normalize_extension(Some(".mov"), "mp4"), "mov");
/// assert_eq!(normalize_extension(None, "mp4"), "mp4");
/// assert_eq!(normalize_extension(Some("../etc"), "mp4"), "mp4");
/// ```
pub fn normalize_extension(extension: Option<&str>, default: &str) -> String {
    let ext = extension
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .unwrap_or_default();

    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return default.to_ascii_lowercase();
    }
    ext
}

/// Check if an extension names a known video container.
pub fn is_video_extension(extension: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(Some("mp4"), "mp4"), "mp4");
        assert_eq!(normalize_extension(Some(" .WebM "), "mp4"), "webm");
        assert_eq!(normalize_extension(Some(""), "mp4"), "mp4");
        assert_eq!(normalize_extension(Some("."), "mp4"), "mp4");
        assert_eq!(normalize_extension(Some("mp4/../x"), "mov"), "mov");
        assert_eq!(normalize_extension(None, "MOV"), "mov");
    }

    #[test]
    fn test_video_extensions() {
        assert!(is_video_extension("mp4"));
        assert!(is_video_extension("M4V"));
        assert!(!is_video_extension("gif"));
    }
}
