//! File-store collaborator. The core only ever asks it to forget a locator;
//! uploads are handled before a locator reaches this crate.

use std::{
    future::Future,
    io,
    path::{Component, Path, PathBuf},
};

use tracing::warn;

pub trait FileStore: Send + Sync {
    /// Removes the object behind `locator`. A missing object is not an error.
    fn remove(&self, locator: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// Stores files under a root directory; locators are paths relative to it.
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a locator onto the root, refusing anything that could escape it.
    pub fn resolve(&self, locator: &str) -> Option<PathBuf> {
        let trimmed = locator.trim_start_matches('/');
        let relative = trimmed.strip_prefix("uploads/").unwrap_or(trimmed);
        if relative.is_empty() {
            return None;
        }
        let path = Path::new(relative);
        if path
            .components()
            .any(|part| !matches!(part, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(path))
    }
}

impl FileStore for LocalFileStore {
    async fn remove(&self, locator: &str) -> io::Result<()> {
        let Some(path) = self.resolve(locator) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("locator {locator:?} is outside the upload root"),
            ));
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Calls [`FileStore::remove`] and logs instead of failing.
pub async fn remove_best_effort<S: FileStore>(store: &S, locator: &str) {
    if let Err(err) = store.remove(locator).await {
        warn!(%locator, error = %err, "failed to remove stored file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_traversal() {
        let store = LocalFileStore::new("/srv/uploads");
        assert_eq!(
            store.resolve("/uploads/a1b2.png"),
            Some(PathBuf::from("/srv/uploads/a1b2.png"))
        );
        assert_eq!(
            store.resolve("reports/q1.pdf"),
            Some(PathBuf::from("/srv/uploads/reports/q1.pdf"))
        );
        assert_eq!(store.resolve("../etc/passwd"), None);
        assert_eq!(store.resolve("/uploads/"), None);
    }

    #[tokio::test]
    async fn remove_deletes_file_and_tolerates_missing() {
        let root = std::env::temp_dir().join(format!("pm-store-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await.unwrap();
        let store = LocalFileStore::new(&root);
        tokio::fs::write(root.join("note.txt"), b"hi").await.unwrap();

        store.remove("/uploads/note.txt").await.unwrap();
        assert!(!root.join("note.txt").exists());
        store.remove("/uploads/note.txt").await.unwrap();
        assert!(store.remove("../escape").await.is_err());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
