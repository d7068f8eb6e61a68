// ABOUTME: Per-session workspace directories on the persistent volume
// ABOUTME: Creates workspaces on demand, snapshots their files, and serves single files safely

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::WorkspaceFile;
use crate::error::{Result, SandboxError, WorkspaceError};

/// Ensure an identifier can be used as a single directory name.
///
/// Identifiers may only contain alphanumerics, `-`, `_` and `.`, and cannot be
/// `.`/`..` or contain path separators.
pub fn validate_identifier(value: &str) -> Result<()> {
    let invalid = |reason: &str| SandboxError::InvalidIdentifier {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("identifier cannot be empty"));
    }
    if value == "." || value.contains("..") || value.contains('/') || value.contains('\\') {
        return Err(invalid("identifier cannot contain path traversal sequences"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "identifier can only contain alphanumeric characters, '-', '_' and '.'",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
    max_file_bytes: u64,
    max_total_bytes: u64,
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64, max_total_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
            max_total_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a session's workspace; does not touch the filesystem
    pub fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_identifier(session_id)?;
        Ok(self.root.join(session_id))
    }

    /// Create the session's workspace (and parents) if absent
    pub async fn ensure(&self, session_id: &str) -> Result<PathBuf> {
        let path = self.path_for(session_id)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| WorkspaceError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("Workspace ready at {}", path.display());
        Ok(path)
    }

    /// Snapshot every regular file under the session's workspace.
    ///
    /// Files written while the walk is in progress may or may not appear.
    /// Symlinks are not followed. Paths are sorted and `/`-separated.
    pub async fn list_files(&self, session_id: &str) -> Result<Vec<WorkspaceFile>> {
        let path = self.path_for(session_id)?;
        let session_id = session_id.to_string();
        let max_file_bytes = self.max_file_bytes;
        let max_total_bytes = self.max_total_bytes;

        tokio::task::spawn_blocking(move || {
            walk_workspace(&path, &session_id, max_file_bytes, max_total_bytes)
        })
        .await
        .map_err(|e| WorkspaceError::Walk(e.to_string()))?
    }

    /// Read one file from a session's workspace, rejecting paths that escape it
    pub async fn read_file(&self, session_id: &str, relative_path: &str) -> Result<Vec<u8>> {
        let root = self.path_for(session_id)?;
        let relative = sanitize_relative_path(relative_path)?;
        let requested = root.join(&relative);

        let canonical_root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|source| WorkspaceError::Io {
                path: root.clone(),
                source,
            })?;
        let canonical_requested = match tokio::fs::canonicalize(&requested).await {
            Ok(path) => path,
            Err(_) => return Err(WorkspaceError::FileNotFound(relative_path.to_string()).into()),
        };

        // Symlinks inside the workspace may still point outside of it
        if !canonical_requested.starts_with(&canonical_root) {
            warn!(
                "Rejected workspace path escaping {}: {}",
                session_id, relative_path
            );
            return Err(WorkspaceError::PathEscape(relative_path.to_string()).into());
        }

        let metadata = tokio::fs::metadata(&canonical_requested)
            .await
            .map_err(|source| WorkspaceError::Io {
                path: canonical_requested.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(WorkspaceError::FileNotFound(relative_path.to_string()).into());
        }
        if metadata.len() > self.max_file_bytes {
            return Err(WorkspaceError::FileTooLarge {
                path: relative_path.to_string(),
                size: metadata.len(),
                limit: self.max_file_bytes,
            }
            .into());
        }

        let content = tokio::fs::read(&canonical_requested)
            .await
            .map_err(|source| WorkspaceError::Io {
                path: canonical_requested,
                source,
            })?;
        Ok(content)
    }

    /// Delete a session's workspace; absent workspaces are ignored
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!("Removed workspace {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Io { path, source }.into()),
        }
    }
}

/// Normalize a caller-supplied relative path, refusing absolute and parent components
fn sanitize_relative_path(relative_path: &str) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::PathEscape(relative_path.to_string()).into());
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(WorkspaceError::FileNotFound(relative_path.to_string()).into());
    }
    Ok(clean)
}

fn walk_workspace(
    root: &Path,
    session_id: &str,
    max_file_bytes: u64,
    max_total_bytes: u64,
) -> Result<Vec<WorkspaceFile>> {
    let mut files = Vec::new();
    let mut total_bytes: u64 = 0;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| WorkspaceError::Walk(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| WorkspaceError::Walk(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = read_capped(entry.path(), &relative, max_file_bytes)?;

        total_bytes += content.len() as u64;
        if total_bytes > max_total_bytes {
            return Err(WorkspaceError::BudgetExceeded {
                session_id: session_id.to_string(),
                limit: max_total_bytes,
            }
            .into());
        }

        files.push(WorkspaceFile {
            path: relative,
            content,
        });
    }

    debug!(
        "Workspace {} holds {} files ({} bytes)",
        session_id,
        files.len(),
        total_bytes
    );
    Ok(files)
}

/// Read a whole file, failing once it grows past `limit` bytes
fn read_capped(path: &Path, relative: &str, limit: u64) -> Result<Vec<u8>> {
    let io_error = |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::open(path).map_err(io_error)?;
    let mut content = Vec::new();
    // Read one byte past the limit so growth during the read is still caught
    file.take(limit.saturating_add(1))
        .read_to_end(&mut content)
        .map_err(io_error)?;

    if content.len() as u64 > limit {
        let size = fs::metadata(path)
            .map(|m| m.len())
            .unwrap_or(content.len() as u64);
        return Err(WorkspaceError::FileTooLarge {
            path: relative.to_string(),
            size,
            limit,
        }
        .into());
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> WorkspaceStore {
        WorkspaceStore::new(dir.path(), 1024, 4096)
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("1712345678.123456").is_ok());
        assert!(validate_identifier("thread_A-1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("..").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("a\\b").is_err());
        assert!(validate_identifier("a b").is_err());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let first = store.ensure("t1").await.unwrap();
        let second = store.ensure("t1").await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(first, dir.path().join("t1"));
    }

    #[tokio::test]
    async fn test_ensure_creates_parents() {
        let dir = TempDir::new().unwrap();
        let store = WorkspaceStore::new(dir.path().join("nested/volume"), 1024, 4096);
        let path = store.ensure("t1").await.unwrap();
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_list_files_empty_workspace() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure("t1").await.unwrap();

        let files = store.list_files("t1").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_list_files_recurses_and_skips_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();

        fs::create_dir_all(root.join("src/empty")).unwrap();
        fs::write(root.join("out.txt"), "hi\n").unwrap();
        fs::write(root.join("src/main.py"), "print(1)\n").unwrap();

        let files = store.list_files("t1").await.unwrap();
        assert_eq!(
            files,
            vec![
                WorkspaceFile {
                    path: "out.txt".to_string(),
                    content: b"hi\n".to_vec(),
                },
                WorkspaceFile {
                    path: "src/main.py".to_string(),
                    content: b"print(1)\n".to_vec(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files_missing_workspace_errors() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let result = store.list_files("never-created").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::Walk(_)))
        ));
    }

    #[tokio::test]
    async fn test_list_files_per_file_budget() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();
        fs::write(root.join("big.bin"), vec![b'x'; 2048]).unwrap();

        let result = store.list_files("t1").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::FileTooLarge { size: 2048, .. }))
        ));
    }

    #[tokio::test]
    async fn test_list_files_total_budget() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();
        for i in 0..5 {
            fs::write(root.join(format!("part{}.txt", i)), vec![b'x'; 1000]).unwrap();
        }

        let result = store.list_files("t1").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::BudgetExceeded { limit: 4096, .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_file_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure("t1").await.unwrap();
        let other = store.ensure("t2").await.unwrap();
        fs::write(other.join("secret.txt"), "nope").unwrap();

        let result = store.read_file("t1", "../t2/secret.txt").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::PathEscape(_)))
        ));

        let result = store.read_file("t1", "/etc/passwd").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::PathEscape(_)))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_file_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();
        let outside = dir.path().join("outside.txt");
        fs::write(&outside, "outside").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link.txt")).unwrap();

        let result = store.read_file("t1", "link.txt").await;
        assert!(matches!(
            result,
            Err(SandboxError::Workspace(WorkspaceError::PathEscape(_)))
        ));

        // The walk never follows the link either
        let files = store.list_files("t1").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_read_file_inside_workspace() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/readme.md"), "# hi").unwrap();

        let content = store.read_file("t1", "./docs/readme.md").await.unwrap();
        assert_eq!(content, b"# hi");

        let missing = store.read_file("t1", "docs/none.md").await;
        assert!(matches!(
            missing,
            Err(SandboxError::Workspace(WorkspaceError::FileNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_remove_workspace() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.ensure("t1").await.unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();

        store.remove("t1").await.unwrap();
        assert!(!root.exists());
        // Second removal is a no-op
        store.remove("t1").await.unwrap();
    }
}
