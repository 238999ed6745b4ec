// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent catalog of layers, head pointer, and tags.
//!
//! The on-disk document is a single pretty-printed JSON file
//! (`index.json`), loaded whole on construction and rewritten whole after
//! every mutation — the same load/save-a-whole-document shape as a config
//! service, specialized to the fixed three-field shape this store requires.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::types::{cache_key, Layer, LayerHash};

/// The serialized shape of `index.json`: `head`, `layers` (append order, not
/// chain order), and `tags`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    head: Option<LayerHash>,
    layers: Vec<Layer>,
    tags: HashMap<String, LayerHash>,
}

/// The layer catalog, backed by a single JSON document on disk.
pub struct Index {
    path: PathBuf,
    doc: IndexDocument,
}

impl Index {
    /// Loads `<state_dir>/index.json`, creating an empty document if absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CorruptIndex`] if the file exists but fails to
    /// parse, or [`EngineError::Io`] on other filesystem failures.
    pub fn open(state_dir: &Path) -> Result<Self, EngineError> {
        let path = state_dir.join("index.json");
        let doc = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| EngineError::CorruptIndex { path: path.clone(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexDocument::default(),
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        Ok(Self { path, doc })
    }

    fn save(&self) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(&self.doc).map_err(|source| {
            EngineError::CorruptIndex { path: self.path.clone(), source }
        })?;
        // Write-then-rename so readers never observe a half-written document.
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| EngineError::io(&dir, e))?;
        std::io::Write::write_all(&mut tmp, &bytes).map_err(|e| EngineError::io(&dir, e))?;
        tmp.persist(&self.path)
            .map_err(|e| EngineError::io(&self.path, e.error))?;
        Ok(())
    }

    /// Current head hash, or `None` if no layer has ever been appended.
    #[must_use]
    pub fn head(&self) -> Option<LayerHash> {
        self.doc.head
    }

    /// All recorded layers in append order (not chain order — dead branches
    /// from past `checkout`s remain in this list).
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.doc.layers
    }

    /// Appends `layer` to the catalog and advances `head` to its hash.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the document cannot be persisted.
    pub fn append(&mut self, layer: Layer) -> Result<(), EngineError> {
        self.doc.head = Some(layer.hash);
        self.doc.layers.push(layer);
        self.save()
    }

    /// Mutates `head` without touching the layer list.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the document cannot be persisted.
    pub fn set_head(&mut self, hash: LayerHash) -> Result<(), EngineError> {
        self.doc.head = Some(hash);
        self.save()
    }

    /// Finds the first layer whose `(instruction, parent)` pair matches by
    /// cache-key equality. Linear scan, first-stored wins.
    #[must_use]
    pub fn find_by_cache_key(&self, instruction: &str, parent: Option<LayerHash>) -> Option<&Layer> {
        let key = cache_key(instruction, parent.as_ref());
        self.doc
            .layers
            .iter()
            .find(|l| cache_key(&l.instruction, l.parent.as_ref()) == key)
    }

    /// The chain from root to `head`, following `parent` pointers backward
    /// and reversing. Stops silently (yielding whatever prefix is intact) if
    /// a parent hash is not present in `layers`.
    #[must_use]
    pub fn ancestry(&self) -> Vec<Layer> {
        let Some(head) = self.doc.head else {
            return Vec::new();
        };
        let by_hash: HashMap<LayerHash, &Layer> =
            self.doc.layers.iter().map(|l| (l.hash, l)).collect();

        let mut chain = Vec::new();
        let mut current = Some(head);
        while let Some(hash) = current {
            let Some(layer) = by_hash.get(&hash) else {
                debug!(%hash, "ancestry walk stopped: dangling parent");
                break;
            };
            chain.push((*layer).clone());
            current = layer.parent;
        }
        chain.reverse();
        chain
    }

    /// The chain from root to `hash`, following `parent` pointers backward
    /// through the raw `layers()` list and reversing — independent of
    /// `head`, so it also reconstructs layers on a branch `checkout` has
    /// left unreachable from head but still addressable by hash.
    ///
    /// Returns an empty chain if `hash` is not present in `layers()`.
    #[must_use]
    pub fn ancestry_of(&self, hash: LayerHash) -> Vec<Layer> {
        let by_hash: HashMap<LayerHash, &Layer> =
            self.doc.layers.iter().map(|l| (l.hash, l)).collect();

        let mut chain = Vec::new();
        let mut current = by_hash.get(&hash).copied();
        while let Some(layer) = current {
            chain.push(layer.clone());
            current = layer.parent.and_then(|p| by_hash.get(&p).copied());
        }
        chain.reverse();
        chain
    }

    /// Resolves a ref to a hash: tag name first, then any-length hash
    /// prefix (first match in list order, rejecting ambiguous multi-match),
    /// then exact hash match.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnresolvedRef`] if nothing matches, or if a
    /// prefix matches more than one distinct layer hash.
    pub fn resolve(&self, reference: &str) -> Result<LayerHash, EngineError> {
        if let Some(hash) = self.doc.tags.get(reference) {
            return Ok(*hash);
        }

        if !reference.is_empty() {
            let hex = reference.to_ascii_lowercase();
            let is_hex_prefix = hex.bytes().all(|b| b.is_ascii_hexdigit());
            if is_hex_prefix {
                let mut matches: Vec<LayerHash> = self
                    .doc
                    .layers
                    .iter()
                    .map(|l| l.hash)
                    .filter(|h| h.to_hex().starts_with(&hex))
                    .collect();
                matches.dedup();
                match matches.len() {
                    1 => return Ok(matches[0]),
                    n if n > 1 => return Err(EngineError::UnresolvedRef(reference.to_string())),
                    _ => {}
                }
            }
        }

        Err(EngineError::UnresolvedRef(reference.to_string()))
    }

    /// Sets or replaces a tag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the document cannot be persisted.
    pub fn set_tag(&mut self, name: &str, hash: LayerHash) -> Result<(), EngineError> {
        self.doc.tags.insert(name.to_string(), hash);
        self.save()
    }

    /// All tags, name to hash.
    #[must_use]
    pub fn tags(&self) -> &HashMap<String, LayerHash> {
        &self.doc.tags
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn layer(instruction: &str, parent: Option<LayerHash>, salt: &[u8]) -> Layer {
        Layer {
            hash: LayerHash::of(salt),
            instruction: instruction.to_string(),
            parent,
            time: 0,
        }
    }

    // ── 1. fresh index has no head and empty layers/tags ────────────────

    #[test]
    fn fresh_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::open(dir.path()).unwrap();
        assert_eq!(index.head(), None);
        assert!(index.layers().is_empty());
        assert!(index.tags().is_empty());
    }

    // ── 2. append sets head and persists across reopen ──────────────────

    #[test]
    fn append_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let l = layer("echo hi", None, b"l1");
        index.append(l.clone()).unwrap();
        assert_eq!(index.head(), Some(l.hash));

        let reopened = Index::open(dir.path()).unwrap();
        assert_eq!(reopened.head(), Some(l.hash));
        assert_eq!(reopened.layers(), &[l]);
    }

    // ── 3. find_by_cache_key: first-stored wins on duplicate keys ───────

    #[test]
    fn find_by_cache_key_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let l1 = layer("echo hi", None, b"first");
        index.append(l1.clone()).unwrap();
        let found = index.find_by_cache_key("echo hi", None).unwrap();
        assert_eq!(found.hash, l1.hash);
    }

    // ── 4. ancestry follows parent pointers root-to-head ─────────────────

    #[test]
    fn ancestry_walks_root_to_head() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let root = layer("init", None, b"root");
        index.append(root.clone()).unwrap();
        let child = layer("echo hi", Some(root.hash), b"child");
        index.append(child.clone()).unwrap();

        let chain = index.ancestry();
        assert_eq!(chain, vec![root, child]);
    }

    // ── 5. ancestry stops silently on a dangling parent ──────────────────

    #[test]
    fn ancestry_stops_on_dangling_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let dangling_parent = LayerHash::of(b"missing");
        let orphan = layer("echo hi", Some(dangling_parent), b"orphan");
        index.append(orphan.clone()).unwrap();

        let chain = index.ancestry();
        assert_eq!(chain, vec![orphan]);
    }

    // ── 6. resolve: tag takes priority over prefix/hash ──────────────────

    #[test]
    fn resolve_tag_priority() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let l = layer("echo hi", None, b"tagged");
        index.append(l.clone()).unwrap();
        index.set_tag("v1", l.hash).unwrap();
        assert_eq!(index.resolve("v1").unwrap(), l.hash);
    }

    // ── 7. resolve: unique prefix match ──────────────────────────────────

    #[test]
    fn resolve_unique_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let l = layer("echo hi", None, b"prefixed");
        index.append(l.clone()).unwrap();
        let prefix = &l.hash.to_hex()[..8];
        assert_eq!(index.resolve(prefix).unwrap(), l.hash);
    }

    // ── 8. resolve: exact hash match ──────────────────────────────────────

    #[test]
    fn resolve_exact_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let l = layer("echo hi", None, b"exact");
        index.append(l.clone()).unwrap();
        assert_eq!(index.resolve(&l.hash.to_hex()).unwrap(), l.hash);
    }

    // ── 9. resolve: unresolvable ref fails ────────────────────────────────

    #[test]
    fn resolve_unknown_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::open(dir.path()).unwrap();
        assert!(index.resolve("nope").is_err());
    }

    // ── 10. ancestry_of walks a dangling branch by hash, not head ────────

    #[test]
    fn ancestry_of_finds_branch_off_head() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let root = layer("init", None, b"root");
        index.append(root.clone()).unwrap();
        let branch1 = layer("echo one", Some(root.hash), b"branch1");
        index.append(branch1.clone()).unwrap();
        index.set_head(root.hash).unwrap();
        let branch2 = layer("echo two", Some(root.hash), b"branch2");
        index.append(branch2.clone()).unwrap();

        // head is now on branch2's chain; branch1 is no longer reachable
        // from head but must still resolve via its own parent pointers.
        assert_eq!(index.ancestry(), vec![root.clone(), branch2]);
        assert_eq!(index.ancestry_of(branch1.hash), vec![root, branch1]);
    }

    // ── 11. ancestry_of an unknown hash is empty ─────────────────────────

    #[test]
    fn ancestry_of_unknown_hash_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::open(dir.path()).unwrap();
        assert!(index.ancestry_of(LayerHash::of(b"nowhere")).is_empty());
    }

    // ── 12. resolve: ambiguous prefix is rejected ────────────────────────

    #[test]
    fn resolve_ambiguous_prefix_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();

        // Find two distinct salts whose hashes share a one-character hex
        // prefix (cheap: ~1/16 chance per attempt against a fixed anchor).
        let anchor = layer("echo hi", None, b"anchor");
        index.append(anchor.clone()).unwrap();
        let anchor_prefix = anchor.hash.to_hex().as_bytes()[0];

        let mut collision = None;
        for i in 0u32..10_000 {
            let candidate = layer("echo hi", None, &i.to_le_bytes());
            if candidate.hash != anchor.hash
                && candidate.hash.to_hex().as_bytes()[0] == anchor_prefix
            {
                collision = Some(candidate);
                break;
            }
        }
        let collision = collision.unwrap();
        index.append(collision).unwrap();

        let shared_prefix = &anchor.hash.to_hex()[..1];
        assert!(index.resolve(shared_prefix).is_err());
    }
}
