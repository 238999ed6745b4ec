// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Portable, uncompressed USTAR pack/unpack of a set of paths.

use std::fs;
use std::io::Read;
use std::path::Path;

use tar::{Builder, EntryType, Header};

use crate::error::EngineError;
use crate::types::RelPath;

/// Packs `paths` (read from under `root`) into a portable USTAR archive, in
/// the order given. Regular files, directories, and symlinks are supported;
/// device/FIFO nodes are rejected.
///
/// Mtimes are normalized to zero so that archive bytes — and therefore the
/// layer hash derived from them — are stable across reruns of an otherwise
/// identical instruction.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if a path cannot be read, or
/// [`EngineError::CorruptBlob`] if an entry is an unsupported node type.
pub fn pack(root: &Path, paths: &[RelPath]) -> Result<Vec<u8>, EngineError> {
    let mut builder = Builder::new(Vec::new());
    for rel in paths {
        let full = root.join(rel.as_str());
        let meta = fs::symlink_metadata(&full).map_err(|e| EngineError::io(&full, e))?;
        let file_type = meta.file_type();

        let mut header = Header::new_ustar();
        header.set_mtime(0);

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            builder
                .append_data(&mut header, rel.as_str(), std::io::empty())
                .map_err(|e| EngineError::io(&full, e))?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&full).map_err(|e| EngineError::io(&full, e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, rel.as_str(), &target)
                .map_err(|e| EngineError::io(&full, e))?;
        } else if file_type.is_file() {
            let bytes = fs::read(&full).map_err(|e| EngineError::io(&full, e))?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(bytes.len() as u64);
            header.set_mode(posix_mode(&meta));
            builder
                .append_data(&mut header, rel.as_str(), bytes.as_slice())
                .map_err(|e| EngineError::io(&full, e))?;
        } else {
            return Err(EngineError::CorruptBlob {
                hash: String::new(),
                reason: format!("unsupported node type at {}", rel.as_str()),
            });
        }
    }
    builder
        .into_inner()
        .map_err(|e| EngineError::io(root, e))
}

#[cfg(unix)]
fn posix_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn posix_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Unpacks `bytes` (a USTAR archive, as produced by [`pack`]) into
/// `workdir`. A zero-byte archive is a no-op. Refuses member paths that are
/// absolute or contain `..` components — strict mode, no path traversal.
///
/// # Errors
///
/// Returns [`EngineError::CorruptBlob`] if the archive cannot be parsed or
/// contains an unsafe member path, or [`EngineError::Io`] if extraction
/// fails.
pub fn unpack(bytes: &[u8], workdir: &Path) -> Result<(), EngineError> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut archive = tar::Archive::new(bytes);
    for entry in archive
        .entries()
        .map_err(|e| corrupt(e, "failed to read archive entries"))?
    {
        let mut entry = entry.map_err(|e| corrupt(e, "failed to read archive entry"))?;
        let path = entry
            .path()
            .map_err(|e| corrupt(e, "failed to read entry path"))?
            .into_owned();
        ensure_safe_member(&path)?;

        let dest = workdir.join(&path);
        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&dest).map_err(|e| EngineError::io(&dest, e))?;
            }
            EntryType::Symlink => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
                }
                let target = entry
                    .link_name()
                    .map_err(|e| corrupt(e, "failed to read symlink target"))?
                    .ok_or_else(|| EngineError::CorruptBlob {
                        hash: String::new(),
                        reason: "symlink entry missing target".to_string(),
                    })?
                    .into_owned();
                let _ = fs::remove_file(&dest);
                symlink(&target, &dest).map_err(|e| EngineError::io(&dest, e))?;
            }
            EntryType::Regular => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
                }
                let mut buf = Vec::new();
                entry
                    .read_to_end(&mut buf)
                    .map_err(|e| EngineError::io(&dest, e))?;
                fs::write(&dest, &buf).map_err(|e| EngineError::io(&dest, e))?;
                set_mode(&dest, entry.header().mode().unwrap_or(0o644))?;
            }
            other => {
                return Err(EngineError::CorruptBlob {
                    hash: String::new(),
                    reason: format!("unsupported entry type {other:?} at {}", path.display()),
                });
            }
        }
    }
    Ok(())
}

fn ensure_safe_member(path: &Path) -> Result<(), EngineError> {
    use std::path::Component;
    if path.is_absolute() {
        return Err(EngineError::CorruptBlob {
            hash: String::new(),
            reason: format!("archive member has absolute path: {}", path.display()),
        });
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(EngineError::CorruptBlob {
                hash: String::new(),
                reason: format!("archive member escapes root: {}", path.display()),
            });
        }
    }
    Ok(())
}

fn corrupt(source: std::io::Error, reason: &str) -> EngineError {
    EngineError::CorruptBlob {
        hash: String::new(),
        reason: format!("{reason}: {source}"),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| EngineError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), EngineError> {
    Ok(())
}
