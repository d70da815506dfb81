//! Filesystem helpers for crash-safe writes.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

/// Write data to a file atomically using temp-file-then-rename.
///
/// The temp file lives in the destination's directory so the rename stays on
/// one filesystem: readers see either the old file or the new file, never a
/// partial write. Parent directories are created as needed.
///
/// A symlink at `path` is written through: its final target is replaced and
/// the link itself stays in place.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let target = follow_symlinks(path)?;
    let path = target.as_path();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;

    // Keep the mode of the file being replaced; a fresh temp file is 0600.
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(tmp.path(), meta.permissions());
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Walk a chain of symlinks to the path that actually holds the data.
///
/// The final target need not exist yet, so a dangling link is followed to
/// where its file would be created.
fn follow_symlinks(path: &Path) -> io::Result<PathBuf> {
    const MAX_HOPS: usize = 40;

    let mut current = path.to_path_buf();
    for _ in 0..MAX_HOPS {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let link = fs::read_link(&current)?;
                current = match current.parent() {
                    Some(parent) if link.is_relative() => parent.join(link),
                    _ => link,
                };
            }
            _ => return Ok(current),
        }
    }
    Err(io::Error::other(format!(
        "too many levels of symbolic links: {}",
        path.display()
    )))
}

/// Resolve a snapshot path against the workspace root unless it is already absolute.
pub fn resolve(workspace_root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace_root.join(p)
    }
}

/// Lexically normalize a relative path: drop `.` and leading root/prefix
/// components, refuse to climb above the start with `..`.
///
/// Returns `None` when nothing usable remains.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Lexically normalize a path, resolving `.` and `..` without touching the
/// filesystem. `..` never climbs above the root of an absolute path.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
