// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-path fingerprinting and whole-tree state computation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::types::{Fingerprint, LayerHash, RelPath};

use super::walk::walk;

/// A mapping `relative path → fingerprint`, materialized by walking either
/// the workdir or a reconstructed layer state. Sorted by path because it's
/// backed by a `BTreeMap`, matching the walk's own sort order.
pub type WorkState = BTreeMap<RelPath, Fingerprint>;

/// Walks `root` and computes the [`Fingerprint`] of every entry.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the walk or any per-entry `stat`/read
/// fails.
pub fn state(root: &Path) -> Result<WorkState, EngineError> {
    let mut out = WorkState::new();
    for rel in walk(root)? {
        let full = root.join(rel.as_str());
        let fingerprint = fingerprint_entry(&full)?;
        out.insert(rel, fingerprint);
    }
    Ok(out)
}

fn fingerprint_entry(path: &Path) -> Result<Fingerprint, EngineError> {
    let meta = fs::symlink_metadata(path).map_err(|e| EngineError::io(path, e))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| EngineError::io(path, e))?;
        return Ok(Fingerprint::Symlink(target.to_string_lossy().into_owned()));
    }
    if file_type.is_dir() {
        return Ok(Fingerprint::Dir);
    }

    let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
    let hash = LayerHash::of(&bytes);
    let mode = posix_mode(&meta);
    Ok(Fingerprint::File { hash, mode })
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
