use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use tokio::sync::Mutex;

use crate::errors::ArtifactError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Video,
    Log,
}

impl ArtifactKind {
    fn subdir(self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::Video => "videos",
            ArtifactKind::Log => "logs",
        }
    }
}

/// Owns the `O/` output tree: directory creation and the
/// `<AppName>_<ActionName>[_<n>].<ext>` filename scheme, including the
/// monotonic-counter collision rule from §4.2's invariant 4.
pub struct ArtifactStore {
    root: PathBuf,
    // Guards the per-(kind, app, action) counters so two concurrent
    // applications never race for the same filename.
    counters: Mutex<HashMap<(ArtifactKind, String, String), u32>>,
}

impl ArtifactStore {
    pub async fn create(root: &Path) -> Result<ArtifactStore, ArtifactError> {
        for sub in ["screenshots", "videos", "logs"] {
            let dir = root.join(sub);
            create_dir_owner_only(&dir).await?;
        }
        create_dir_owner_only(root).await?;
        Ok(ArtifactStore {
            root: root.to_path_buf(),
            counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserves and returns the next artifact path for `(app, action)` of
    /// the given kind and extension. Never returns a path reused within
    /// this store's lifetime.
    pub async fn reserve(
        &self,
        kind: ArtifactKind,
        app_name: &str,
        action_name: &str,
        extension: &str,
    ) -> Result<PathBuf, ArtifactError> {
        let key = (kind, app_name.to_string(), action_name.to_string());
        let mut counters = self.counters.lock().await;
        let n = counters.entry(key).or_insert(0);
        let path = if *n == 0 {
            self.path_for(kind, app_name, action_name, None, extension)
        } else {
            self.path_for(kind, app_name, action_name, Some(*n), extension)
        };
        *n += 1;
        self.validate_contained(&path)?;
        Ok(path)
    }

    fn path_for(
        &self,
        kind: ArtifactKind,
        app_name: &str,
        action_name: &str,
        suffix: Option<u32>,
        extension: &str,
    ) -> PathBuf {
        let filename = match suffix {
            Some(n) => format!("{app_name}_{action_name}_{n}.{extension}"),
            None => format!("{app_name}_{action_name}.{extension}"),
        };
        self.root.join(kind.subdir()).join(filename)
    }

    /// Enforces that `path` lives under the output root — the §4.2 rule
    /// that the executor never writes outside `O`. `path` may not exist on
    /// disk yet (it's often a freshly reserved, unwritten path), so this
    /// can't `canonicalize`; instead it resolves `.`/`..` components
    /// lexically before the prefix check, so a crafted app/action name
    /// containing `..` can't smuggle a path outside `root` past a plain
    /// `Path::starts_with`.
    pub fn validate_contained(&self, path: &Path) -> Result<(), ArtifactError> {
        let normalized_root = normalize_lexically(&self.root);
        let normalized_path = normalize_lexically(path);
        if normalized_path.starts_with(&normalized_root) {
            Ok(())
        } else {
            Err(ArtifactError::Escape {
                path: path.to_path_buf(),
            })
        }
    }

    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.validate_contained(path)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|error| ArtifactError::WriteFailure {
                path: path.to_path_buf(),
                error,
            })?;
        set_owner_only_file(path).await?;
        Ok(())
    }

    pub fn report_json_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn report_html_path(&self) -> PathBuf {
        self.root.join("report.html")
    }
}

/// Resolves `.` and `..` components without touching the filesystem, so it
/// works on paths that don't exist yet. A leading `..` that would escape
/// the path's own root is kept as-is (same behavior `components()`-based
/// normalizers use elsewhere) rather than silently dropped.
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.push(component.as_os_str());
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

async fn create_dir_owner_only(dir: &Path) -> Result<(), ArtifactError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|error| ArtifactError::DirectoryCreation {
            path: dir.to_path_buf(),
            error,
        })?;
    set_owner_only_dir(dir).await
}

#[cfg(unix)]
async fn set_owner_only_dir(dir: &Path) -> Result<(), ArtifactError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(dir, perms)
        .await
        .map_err(|error| ArtifactError::DirectoryCreation {
            path: dir.to_path_buf(),
            error,
        })
}

#[cfg(not(unix))]
async fn set_owner_only_dir(_dir: &Path) -> Result<(), ArtifactError> {
    debug!("owner-restricted permissions are a unix-only contract, skipping on this platform");
    Ok(())
}

#[cfg(unix)]
async fn set_owner_only_file(path: &Path) -> Result<(), ArtifactError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|error| ArtifactError::WriteFailure {
            path: path.to_path_buf(),
            error,
        })
}

#[cfg(not(unix))]
async fn set_owner_only_file(_path: &Path) -> Result<(), ArtifactError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_expected_tree() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        assert!(store.root().join("screenshots").is_dir());
        assert!(store.root().join("videos").is_dir());
        assert!(store.root().join("logs").is_dir());
    }

    #[tokio::test]
    async fn first_reservation_has_no_suffix() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        let path = store
            .reserve(ArtifactKind::Screenshot, "app1", "click", "png")
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "app1_click.png");
    }

    #[tokio::test]
    async fn collisions_get_monotonic_suffix() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        let first = store
            .reserve(ArtifactKind::Screenshot, "app1", "click", "png")
            .await
            .unwrap();
        let second = store
            .reserve(ArtifactKind::Screenshot, "app1", "click", "png")
            .await
            .unwrap();
        let third = store
            .reserve(ArtifactKind::Screenshot, "app1", "click", "png")
            .await
            .unwrap();
        assert_eq!(first.file_name().unwrap().to_str().unwrap(), "app1_click.png");
        assert_eq!(second.file_name().unwrap().to_str().unwrap(), "app1_click_1.png");
        assert_eq!(third.file_name().unwrap().to_str().unwrap(), "app1_click_2.png");
    }

    #[tokio::test]
    async fn distinct_actions_do_not_share_counters() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        let a = store
            .reserve(ArtifactKind::Screenshot, "app1", "click", "png")
            .await
            .unwrap();
        let b = store
            .reserve(ArtifactKind::Screenshot, "app1", "submit", "png")
            .await
            .unwrap();
        assert_eq!(a.file_name().unwrap().to_str().unwrap(), "app1_click.png");
        assert_eq!(b.file_name().unwrap().to_str().unwrap(), "app1_submit.png");
    }

    #[tokio::test]
    async fn rejects_path_outside_root() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        let outside = PathBuf::from("/tmp/definitely-outside-panoptic-output");
        let err = store.validate_contained(&outside).unwrap_err();
        match err {
            ArtifactError::Escape { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn traversal_via_path_for_is_caught_lexically() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        // Simulates what `path_for` would build from a crafted action name
        // containing `..` -- the `..`s only show up in a later component,
        // so a purely lexical `starts_with` on the raw path would pass.
        let crafted = store
            .root()
            .join("screenshots")
            .join("../../../etc/passwd");
        let err = store.validate_contained(&crafted).unwrap_err();
        match err {
            ArtifactError::Escape { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_creates_owner_only_file() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::create(dir.path()).await.unwrap();
        let path = store
            .reserve(ArtifactKind::Log, "app1", "init", "txt")
            .await
            .unwrap();
        store.write(&path, b"hello").await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"hello");
    }
}
