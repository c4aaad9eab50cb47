//! Extension-based MIME derivation and the supported-media filter.
//!
//! Implements the minimum supported-extension lists verbatim, kept as one
//! match arm per extension so the list is a one-line addition.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Returns `(mime_type, kind)` for a case-insensitive extension, or `None`
/// if the extension is not a supported media type.
pub fn mime_for_extension(extension: &str) -> Option<(&'static str, MediaKind)> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(("image/jpeg", MediaKind::Image)),
        "png" => Some(("image/png", MediaKind::Image)),
        "gif" => Some(("image/gif", MediaKind::Image)),
        "webp" => Some(("image/webp", MediaKind::Image)),
        "bmp" => Some(("image/bmp", MediaKind::Image)),
        "tif" | "tiff" => Some(("image/tiff", MediaKind::Image)),
        "mp4" => Some(("video/mp4", MediaKind::Video)),
        "mov" => Some(("video/quicktime", MediaKind::Video)),
        "webm" => Some(("video/webm", MediaKind::Video)),
        "mkv" => Some(("video/x-matroska", MediaKind::Video)),
        "avi" => Some(("video/x-msvideo", MediaKind::Video)),
        _ => None,
    }
}

pub fn is_supported_extension(extension: &str) -> bool {
    mime_for_extension(extension).is_some()
}

/// `gif` is an image for duplicate-threshold purposes even though it is
/// animated; this distinction only matters to the UI, out of scope.
pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_images_and_videos_case_insensitively() {
        assert_eq!(mime_for_extension("JPG").unwrap().0, "image/jpeg");
        assert_eq!(mime_for_extension("Mp4").unwrap().0, "video/mp4");
    }

    #[test]
    fn rejects_unknown_extensions() {
        assert!(mime_for_extension("txt").is_none());
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn gif_counts_as_image() {
        let (mime, kind) = mime_for_extension("gif").unwrap();
        assert_eq!(kind, MediaKind::Image);
        assert!(is_image_mime(mime));
    }
}
