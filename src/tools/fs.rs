//! File actions with per-node optimistic concurrency control.
//!
//! A node remembers the SHA-256 of every file it read or wrote. A write to a
//! path the node has a fingerprint for is refused if the file on disk no
//! longer matches it. The check and the write are not atomic.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::ToolError;
use crate::node::Node;

/// Hex SHA-256 of file content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Relative paths resolve against the working directory; absolute paths are kept.
///
/// The result is normalized lexically, so every spelling of a file maps to
/// one version key.
pub fn resolve(working_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    };
    normalize(&joined)
}

/// Drop `.` and fold `..` into its parent without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

fn version_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn io_error(path: &str, source: std::io::Error) -> ToolError {
    ToolError::Io {
        path: path.to_string(),
        source,
    }
}

pub async fn read_file(node: &mut Node, working_dir: &Path, path: &str) -> Result<String, ToolError> {
    let resolved = resolve(working_dir, path);
    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|e| io_error(path, e))?;
    let version = fingerprint(&bytes);
    let content = String::from_utf8(bytes).map_err(|_| ToolError::NotUtf8 {
        path: path.to_string(),
    })?;

    debug!(node = %node.id, path = %resolved.display(), "recorded file version on read");
    node.file_versions.insert(version_key(&resolved), version);
    Ok(content)
}

pub async fn write_file(
    node: &mut Node,
    working_dir: &Path,
    path: &str,
    content: &str,
) -> Result<String, ToolError> {
    let resolved = resolve(working_dir, path);
    let key = version_key(&resolved);

    if let Some(expected) = node.file_versions.get(&key) {
        match tokio::fs::read(&resolved).await {
            Ok(current) => {
                if fingerprint(&current) != *expected {
                    warn!(node = %node.id, path = %resolved.display(), "write refused: file changed since last read");
                    return Err(ToolError::Conflict {
                        path: path.to_string(),
                    });
                }
            }
            // Deleted since we read it: nothing to overwrite.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(path, e)),
        }
    }

    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(path, e))?;
    }
    tokio::fs::write(&resolved, content)
        .await
        .map_err(|e| io_error(path, e))?;

    node.file_versions.insert(key, fingerprint(content.as_bytes()));
    Ok(format!("Wrote {} bytes to {}", content.len(), path))
}

pub async fn list_directory(working_dir: &Path, path: &str) -> Result<String, ToolError> {
    let resolved = resolve(working_dir, path);
    let mut entries = tokio::fs::read_dir(&resolved)
        .await
        .map_err(|e| io_error(path, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(path, e))? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names.join("\n"))
}
