//! Streams filesystem entries under a library root, filtered to supported
//! media extensions.

use super::supported_media::is_supported_extension;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub full_path: PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
    pub last_modified_utc: DateTime<Utc>,
}

pub struct MediaSource;

impl MediaSource {
    /// Enumerates every supported-media file under `root`, depth-first.
    /// Errors reading an individual entry are logged and skipped — a single
    /// unreadable file never aborts the scan.
    pub fn scan(root: &Path) -> Vec<MediaEntry> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).into_iter() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read directory entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let extension = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if !is_supported_extension(extension) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "failed to stat file");
                    continue;
                }
            };

            let relative_path = match entry.path().strip_prefix(root) {
                Ok(rel) => normalize_relative_path(rel),
                Err(_) => continue,
            };

            let last_modified_utc = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);

            entries.push(MediaEntry {
                full_path: entry.path().to_path_buf(),
                relative_path,
                size_bytes: metadata.len(),
                last_modified_utc,
            });
        }

        entries
    }
}

/// Normalizes platform separators to `/`, the wire format relative paths
/// always use.
pub fn normalize_relative_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_filters_to_supported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.png"), b"x").unwrap();

        let entries = MediaSource::scan(dir.path());
        let mut relative_paths: Vec<_> = entries.iter().map(|e| e.relative_path.clone()).collect();
        relative_paths.sort();

        assert_eq!(relative_paths, vec!["a.jpg".to_string(), "sub/b.png".to_string()]);
    }
}
