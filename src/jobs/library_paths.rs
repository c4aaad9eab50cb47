//! Shared helper for derived-data jobs that need a post's absolute path:
//! loads every library root once per job invocation rather than querying
//! per post.

use crate::db::posts::Post;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct LibraryRoots(HashMap<i64, PathBuf>);

impl LibraryRoots {
    pub async fn load(pool: &SqlitePool) -> anyhow::Result<Self> {
        let all = crate::db::libraries::list_libraries(pool).await?;
        Ok(Self(all.into_iter().map(|l| (l.id, PathBuf::from(l.path))).collect()))
    }

    /// Empty set, populated via [`Self::set`] — used by tests and by callers
    /// that already know the one or two roots a request touches.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, library_id: i64, root: PathBuf) {
        self.0.insert(library_id, root);
    }

    pub fn full_path(&self, post: &Post) -> Option<PathBuf> {
        self.0.get(&post.library_id).map(|root| root.join(&post.relative_path))
    }

    pub fn root(&self, library_id: i64) -> Option<&Path> {
        self.0.get(&library_id).map(|p| p.as_path())
    }
}
