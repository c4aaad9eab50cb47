//! Best-effort stable per-file identity, used as a heuristic for rename
//! detection. On unix this is `(device, inode)`; it survives renames within
//! the same filesystem but is not guaranteed across filesystems or copies.

use std::fs::Metadata;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: String,
    pub value: String,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        Some(FileIdentity {
            device: metadata.dev().to_string(),
            value: metadata.ino().to_string(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        // No stable cross-platform equivalent without extra platform crates;
        // callers fall back to path+hash-only move detection.
        None
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identity_is_stable_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.txt");
        let mut file = std::fs::File::create(&original).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let before = FileIdentity::from_metadata(&std::fs::metadata(&original).unwrap()).unwrap();

        let renamed = dir.path().join("b.txt");
        std::fs::rename(&original, &renamed).unwrap();

        let after = FileIdentity::from_metadata(&std::fs::metadata(&renamed).unwrap()).unwrap();
        assert_eq!(before, after);
    }
}
