// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Write-once, content-addressed blob storage on disk.
//!
//! One blob per layer: the layer's archive bytes (see the `snapshot`
//! module), keyed by [`LayerHash`](crate::types::LayerHash). `put` is
//! idempotent — storing the same hash twice is a no-op in effect — and the
//! store never partially writes a blob: writes land in a temp file in the
//! same directory and are renamed into place atomically.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::types::LayerHash;

/// Content-addressed blob storage.
///
/// Implementations must make `has`/`get`/`put` total: every hash is either
/// absent or present with exactly the bytes it was stored with.
pub trait BlobStore {
    /// Returns whether a blob for `hash` is stored.
    fn has(&self, hash: &LayerHash) -> Result<bool, EngineError>;

    /// Reads the blob for `hash`, or `None` if absent. Absence is not an
    /// error.
    fn get(&self, hash: &LayerHash) -> Result<Option<Vec<u8>>, EngineError>;

    /// Stores `bytes` under `hash`. Idempotent: overwriting the same hash
    /// with the same bytes is a no-op in effect.
    fn put(&self, hash: &LayerHash, bytes: &[u8]) -> Result<(), EngineError>;

    /// Byte length of the stored blob, or `None` if absent. Used by
    /// `Engine::inspect` to report `size`.
    fn size(&self, hash: &LayerHash) -> Result<Option<u64>, EngineError>;
}

/// Disk-backed [`BlobStore`]: one flat directory, one file per blob named by
/// its full hex hash.
///
/// No sharding by hash prefix — the flat layout is sufficient up to tens of
/// thousands of layers, per the on-disk layout spec.
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Opens (creating if absent) a blob store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if `dir` cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, hash: &LayerHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }
}

impl BlobStore for FsBlobStore {
    fn has(&self, hash: &LayerHash) -> Result<bool, EngineError> {
        Ok(self.path_for(hash).is_file())
    }

    fn get(&self, hash: &LayerHash) -> Result<Option<Vec<u8>>, EngineError> {
        let path = self.path_for(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(path, e)),
        }
    }

    fn put(&self, hash: &LayerHash, bytes: &[u8]) -> Result<(), EngineError> {
        let dest = self.path_for(hash);
        if dest.is_file() {
            return Ok(());
        }
        write_atomic(&self.dir, &dest, bytes)
    }

    fn size(&self, hash: &LayerHash) -> Result<Option<u64>, EngineError> {
        let path = self.path_for(hash);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(path, e)),
        }
    }
}

/// Write `bytes` to `dest` via a temp file in `dir`, then rename atomically.
fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| EngineError::io(dir, e))?;
    std::io::Write::write_all(&mut tmp, bytes).map_err(|e| EngineError::io(dir, e))?;
    tmp.persist(dest)
        .map_err(|e| EngineError::io(dest, e.error))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. put + get round-trip ──────────────────────────────────────────

    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let hash = LayerHash::of(b"hello blob store");
        store.put(&hash, b"hello blob store").unwrap();
        let got = store.get(&hash).unwrap();
        assert_eq!(got, Some(b"hello blob store".to_vec()));
    }

    // ── 2. has returns false for missing, true for stored ────────────────

    #[test]
    fn has_missing_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let hash = LayerHash::of(b"x");
        assert!(!store.has(&hash).unwrap());
        store.put(&hash, b"x").unwrap();
        assert!(store.has(&hash).unwrap());
    }

    // ── 3. get of missing hash is None, not an error ────────────────────

    #[test]
    fn get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let hash = LayerHash::of(b"never stored");
        assert_eq!(store.get(&hash).unwrap(), None);
    }

    // ── 4. put is idempotent ─────────────────────────────────────────────

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let hash = LayerHash::of(b"dup");
        store.put(&hash, b"dup").unwrap();
        store.put(&hash, b"dup").unwrap();
        assert_eq!(store.get(&hash).unwrap(), Some(b"dup".to_vec()));
    }

    // ── 5. size reports byte length ──────────────────────────────────────

    #[test]
    fn size_reports_byte_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let hash = LayerHash::of(b"12345");
        assert_eq!(store.size(&hash).unwrap(), None);
        store.put(&hash, b"12345").unwrap();
        assert_eq!(store.size(&hash).unwrap(), Some(5));
    }

    // ── 6. blobs directory is created on open ───────────────────────────

    #[test]
    fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("blobs");
        assert!(!nested.exists());
        FsBlobStore::open(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
