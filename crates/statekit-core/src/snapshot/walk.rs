// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recursive, sorted directory walk.

use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::types::RelPath;

/// Walks `root` recursively and returns every entry (files, directories,
/// symlinks) as a path relative to `root`, sorted lexicographically on the
/// full relative path.
///
/// Symlinks are not followed — they are yielded as entries in their own
/// right and never descended into. Hidden entries (dotfiles) are included.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if any directory along the walk cannot be
/// read.
pub fn walk(root: &Path) -> Result<Vec<RelPath>, EngineError> {
    let mut out = Vec::new();
    if root.is_dir() {
        walk_into(root, Path::new(""), &mut out)?;
    }
    out.sort();
    Ok(out)
}

fn walk_into(root: &Path, rel: &Path, out: &mut Vec<RelPath>) -> Result<(), EngineError> {
    let dir = root.join(rel);
    let entries = fs::read_dir(&dir).map_err(|e| EngineError::io(&dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(&dir, e))?;
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        let file_type = entry.file_type().map_err(|e| EngineError::io(entry.path(), e))?;

        let rel_string = to_forward_slash(&child_rel);
        out.push(RelPath::new(rel_string));

        if file_type.is_dir() {
            walk_into(root, &child_rel, out)?;
        }
        // Symlinks (even to directories) are leaves for walk purposes: we
        // never descend through them.
    }
    Ok(())
}

fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
