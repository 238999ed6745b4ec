// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The algorithmic heart of `statekit`: walking the workdir, fingerprinting
//! filesystem state, and packing/unpacking per-layer TAR deltas.

mod archive;
mod fingerprint;
mod walk;

pub use fingerprint::{state, WorkState};
pub use walk::walk;

use std::path::Path;

use serde::Serialize;
use tempfile::TempDir;

use crate::blob_store::BlobStore;
use crate::error::EngineError;
use crate::types::{Layer, LayerHash, RelPath};

/// The result of a successful [`capture`] or [`diff`]: the bytes to store in
/// the [`BlobStore`] and the hash that identifies the layer.
pub struct Captured {
    /// The layer's identity hash.
    pub hash: LayerHash,
    /// The archive bytes to persist under `hash`.
    pub archive: Vec<u8>,
}

/// Captures the entire workdir as a root layer's archive.
///
/// Returns `None` if the workdir is empty — no layer is created for an
/// instruction that produced nothing.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the walk or archive packing fails.
pub fn capture(workdir: &Path) -> Result<Option<Captured>, EngineError> {
    let paths = walk::walk(workdir)?;
    if paths.is_empty() {
        return Ok(None);
    }
    let archive = archive::pack(workdir, &paths)?;
    let hash = LayerHash::of(&archive);
    Ok(Some(Captured { hash, archive }))
}

/// Computes the non-root delta of `workdir` against the state reconstructed
/// from `parent_chain` (root..=parent, in chain order).
///
/// Returns `None` if nothing changed or was deleted since the parent state
/// — the canonical "no-op instruction" result.
///
/// The returned hash covers `archive ‖ canonical-json(deleted)`, but the
/// deleted-file list itself is **not** part of the returned archive bytes —
/// deletions are resolved only by a full [`rebuild`], a known limitation
/// this store preserves bit-for-bit (see `DESIGN.md`).
///
/// # Errors
///
/// Returns [`EngineError`] if reconstructing the parent state, walking the
/// workdir, or packing the archive fails.
pub fn diff(
    workdir: &Path,
    blobs: &dyn BlobStore,
    parent_chain: &[Layer],
) -> Result<Option<Captured>, EngineError> {
    let current = fingerprint::state(workdir)?;
    let base = reconstruct_state(blobs, parent_chain)?;

    let mut changed: Vec<RelPath> = Vec::new();
    for (path, fp) in &current {
        match base.get(path) {
            Some(base_fp) if base_fp.content_key() == fp.content_key() => {}
            _ => changed.push(path.clone()),
        }
    }
    changed.sort();

    let mut deleted: Vec<RelPath> = base
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();
    deleted.sort();

    if changed.is_empty() && deleted.is_empty() {
        return Ok(None);
    }

    let archive = if changed.is_empty() {
        Vec::new()
    } else {
        archive::pack(workdir, &changed)?
    };

    let deleted_json = canonical_json_paths(&deleted);
    let mut hashed = archive.clone();
    hashed.extend_from_slice(&deleted_json);
    let hash = LayerHash::of(&hashed);

    Ok(Some(Captured { hash, archive }))
}

/// Canonical JSON encoding of a deleted-path list: a plain JSON array of
/// strings in iteration (sorted) order, no whitespace. Part of a layer's
/// hashed identity bytes but never persisted in the blob itself.
fn canonical_json_paths(paths: &[RelPath]) -> Vec<u8> {
    #[derive(Serialize)]
    struct Wrapper<'a>(&'a [String]);
    let strings: Vec<String> = paths.iter().map(|p| p.as_str().to_string()).collect();
    serde_json::to_vec(&Wrapper(&strings)).unwrap_or_default()
}

/// Restores a single layer's archive into `workdir`, without clearing it
/// first. A no-op if the blob is empty or the layer has no archive bytes.
///
/// # Errors
///
/// Returns [`EngineError::CorruptBlob`] if the blob is missing, or
/// [`EngineError::Io`] if extraction fails.
pub fn restore_one(workdir: &Path, blobs: &dyn BlobStore, hash: &LayerHash) -> Result<(), EngineError> {
    let bytes = blobs.get(hash)?.ok_or_else(|| EngineError::CorruptBlob {
        hash: hash.to_hex(),
        reason: "blob missing from store".to_string(),
    })?;
    archive::unpack(&bytes, workdir)
}

/// Deletes and recreates `workdir`, then applies `restore_one` for each
/// layer in `chain` order (root to head). This is the only way the store
/// resolves deletions, since a non-root layer's delete list isn't persisted
/// standalone.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the workdir cannot be reset, or any
/// per-layer restore error.
pub fn rebuild(workdir: &Path, blobs: &dyn BlobStore, chain: &[Layer]) -> Result<(), EngineError> {
    if workdir.exists() {
        std::fs::remove_dir_all(workdir).map_err(|e| EngineError::io(workdir, e))?;
    }
    std::fs::create_dir_all(workdir).map_err(|e| EngineError::io(workdir, e))?;
    for layer in chain {
        restore_one(workdir, blobs, &layer.hash)?;
    }
    Ok(())
}

/// Reconstructs the [`WorkState`] for the tip of `chain` without touching
/// the caller's workdir: materializes `chain` into a scoped scratch
/// directory (created, used, and guaranteed removed even on error, via
/// [`TempDir`]'s drop semantics), then fingerprints it.
///
/// An empty `chain` reconstructs to the empty state (the root-layer case,
/// where there is no parent to reconstruct).
///
/// # Errors
///
/// Returns [`EngineError`] if the scratch directory cannot be created, any
/// layer fails to restore, or the resulting tree cannot be fingerprinted.
pub fn reconstruct_state(
    blobs: &dyn BlobStore,
    chain: &[Layer],
) -> Result<WorkState, EngineError> {
    if chain.is_empty() {
        return Ok(WorkState::new());
    }
    let scratch = TempDir::new().map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
    for layer in chain {
        restore_one(scratch.path(), blobs, &layer.hash)?;
    }
    fingerprint::state(scratch.path())
}
