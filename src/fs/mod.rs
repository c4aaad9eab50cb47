//! Filesystem collaborators: safe path resolution, directory scanning,
//! per-file identity, and the supported-media extension table.

pub mod file_identity;
pub mod media_source;
pub mod safe_path;
pub mod supported_media;

pub use file_identity::FileIdentity;
pub use media_source::{MediaEntry, MediaSource};
pub use safe_path::resolve_safe_subpath;
pub use supported_media::{mime_for_extension, MediaKind};
