// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Orchestrates `run`/`exec`/`checkout`/`rebuild`/`status`/`diff` and
//! enforces the invariants between the [`Index`], [`BlobStore`],
//! snapshotting, and the [`Runner`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::blob_store::{BlobStore, FsBlobStore};
use crate::error::EngineError;
use crate::index::Index;
use crate::runner::{Runner, ShellRunner};
use crate::snapshot;
use crate::types::{Fingerprint, Layer, LayerHash, RelPath};

/// Filesystem locations the engine operates over.
///
/// Both paths are resolved to absolute paths at construction. The core
/// reads no environment variables itself — callers (e.g. the CLI) resolve
/// `STATEKIT_DIR`/`STATEKIT_WORK` and similar before building this.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for the index, blob store, and other engine state.
    pub state_dir: PathBuf,
    /// The working directory instructions execute in and snapshots are
    /// taken of.
    pub workdir: PathBuf,
}

impl EngineConfig {
    /// Builds a config from explicit paths, defaulting `state_dir` to
    /// `.statekit` and `workdir` to `<state_dir>/work` when absent, and
    /// resolving both to absolute paths.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the current directory cannot be
    /// determined (needed to make a relative default absolute).
    pub fn resolve(
        state_dir: Option<PathBuf>,
        workdir: Option<PathBuf>,
    ) -> Result<Self, EngineError> {
        let cwd = std::env::current_dir().map_err(|e| EngineError::io(".", e))?;
        let state_dir = absolutize(&cwd, state_dir.unwrap_or_else(|| PathBuf::from(".statekit")));
        let workdir = absolutize(&cwd, workdir.unwrap_or_else(|| state_dir.join("work")));
        Ok(Self { state_dir, workdir })
    }
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// The outcome of [`Engine::run`], a tagged variant in place of an untyped
/// result object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new layer was created.
    Created {
        /// The new layer's hash.
        hash: LayerHash,
    },
    /// A prior layer matched the cache key; its content was materialized
    /// into the workdir. Head is **not** advanced — see `DESIGN.md`.
    Cached {
        /// The matched layer's hash.
        hash: LayerHash,
    },
    /// The instruction ran but produced no filesystem change; no layer was
    /// recorded and head is unchanged.
    Empty {
        /// The (unchanged) head hash, if any.
        head: Option<LayerHash>,
    },
}

/// A filesystem diff between two states: paths added, modified, or deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// Present in the new state only.
    pub added: Vec<RelPath>,
    /// Present in both states with a different fingerprint.
    pub modified: Vec<RelPath>,
    /// Present in the old state only.
    pub deleted: Vec<RelPath>,
}

impl StateDiff {
    /// True when there is no difference between the two states.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    fn compute(from: &BTreeMap<RelPath, Fingerprint>, to: &BTreeMap<RelPath, Fingerprint>) -> Self {
        let mut added = Vec::new();
        let mut modified = Vec::new();
        for (path, fp) in to {
            match from.get(path) {
                None => added.push(path.clone()),
                Some(old) if old.content_key() != fp.content_key() => modified.push(path.clone()),
                Some(_) => {}
            }
        }
        let deleted: Vec<RelPath> = from
            .keys()
            .filter(|p| !to.contains_key(*p))
            .cloned()
            .collect();
        Self { added, modified, deleted }
    }
}

/// Metadata about one layer, as reported by [`Engine::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// The layer's hash.
    pub hash: LayerHash,
    /// The instruction that produced it.
    pub instruction: String,
    /// Its parent, if any.
    pub parent: Option<LayerHash>,
    /// Creation instant, milliseconds since the Unix epoch.
    pub time: u64,
    /// Byte length of the stored blob.
    pub size: u64,
}

/// Ties the [`Index`], [`BlobStore`], snapshotting, and [`Runner`] together
/// and enforces the invariants between them. Owns no persistent state of
/// its own — a façade over its collaborators.
pub struct Engine<R: Runner = ShellRunner> {
    config: EngineConfig,
    index: Index,
    blobs: FsBlobStore,
    runner: R,
}

impl Engine<ShellRunner> {
    /// Opens an engine at `config`, creating `state_dir`/`workdir` if
    /// absent, using the default POSIX shell runner.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the directories cannot be created, or
    /// [`EngineError::CorruptIndex`] if an existing index fails to parse.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        Self::open_with_runner(config, ShellRunner)
    }
}

impl<R: Runner> Engine<R> {
    /// Opens an engine with a caller-supplied [`Runner`] — used by tests to
    /// avoid spawning real subprocesses.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the directories cannot be created, or
    /// [`EngineError::CorruptIndex`] if an existing index fails to parse.
    pub fn open_with_runner(config: EngineConfig, runner: R) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.state_dir).map_err(|e| EngineError::io(&config.state_dir, e))?;
        std::fs::create_dir_all(&config.workdir).map_err(|e| EngineError::io(&config.workdir, e))?;
        let index = Index::open(&config.state_dir)?;
        let blobs = FsBlobStore::open(config.state_dir.join("blobs"))?;
        Ok(Self { config, index, blobs, runner })
    }

    /// The engine's resolved configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes `instruction` and captures its effect as a layer, or
    /// replays a cached layer if one matches `(instruction, head)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandFailed`] if the subprocess exits
    /// non-zero (no layer is recorded), or any store/snapshot I/O error.
    pub async fn run(&mut self, instruction: &str) -> Result<RunOutcome, EngineError> {
        let parent = self.index.head();

        if let Some(hit) = self.index.find_by_cache_key(instruction, parent) {
            let hit_hash = hit.hash;
            info!(hash = %hit_hash, %instruction, "cache hit");
            snapshot::restore_one(&self.config.workdir, &self.blobs, &hit_hash)?;
            // Head is deliberately not advanced on a cache hit — see
            // DESIGN.md.
            return Ok(RunOutcome::Cached { hash: hit_hash });
        }

        self.runner.exec(instruction, &self.config.workdir).await?;

        let result = match parent {
            // `parent` is always the current head here, so its ancestry is
            // exactly `self.index.ancestry()`.
            Some(_) => snapshot::diff(&self.config.workdir, &self.blobs, &self.index.ancestry())?,
            None => snapshot::capture(&self.config.workdir)?,
        };

        let Some(captured) = result else {
            info!(%instruction, "no-op instruction, nothing captured");
            return Ok(RunOutcome::Empty { head: parent });
        };

        self.blobs.put(&captured.hash, &captured.archive)?;
        let layer = Layer {
            hash: captured.hash,
            instruction: instruction.to_string(),
            parent,
            time: now_millis(),
        };
        self.index.append(layer)?;
        info!(hash = %captured.hash, %instruction, "layer created");
        Ok(RunOutcome::Created { hash: captured.hash })
    }

    /// Runs `instruction` via the [`Runner`] only — no index or blob store
    /// interaction. For queries that must not create layers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandFailed`] if the subprocess exits
    /// non-zero.
    pub async fn exec(&self, instruction: &str) -> Result<(), EngineError> {
        self.runner.exec(instruction, &self.config.workdir).await
    }

    /// Runs each instruction in `instructions` via [`Engine::run`], in
    /// order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first failing instruction's error; earlier
    /// instructions' layers remain recorded.
    pub async fn batch(&mut self, instructions: &[String]) -> Result<Vec<RunOutcome>, EngineError> {
        let mut outcomes = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            outcomes.push(self.run(instruction).await?);
        }
        Ok(outcomes)
    }

    /// Reconstructs the workdir from the full chain (root to head).
    /// Returns the number of layers applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the workdir cannot be reset or any layer
    /// fails to restore.
    pub fn rebuild(&self) -> Result<usize, EngineError> {
        let chain = self.index.ancestry();
        snapshot::rebuild(&self.config.workdir, &self.blobs, &chain)?;
        Ok(chain.len())
    }

    /// Deletes `state_dir` and `workdir` entirely (independently of each
    /// other — `workdir` need not be nested under `state_dir`) and
    /// reopens with an empty index, blob store, and workdir.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if either directory cannot be removed or
    /// recreated.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.config.state_dir.exists() {
            std::fs::remove_dir_all(&self.config.state_dir)
                .map_err(|e| EngineError::io(&self.config.state_dir, e))?;
        }
        if self.config.workdir.exists() {
            std::fs::remove_dir_all(&self.config.workdir)
                .map_err(|e| EngineError::io(&self.config.workdir, e))?;
        }
        std::fs::create_dir_all(&self.config.state_dir)
            .map_err(|e| EngineError::io(&self.config.state_dir, e))?;
        std::fs::create_dir_all(&self.config.workdir)
            .map_err(|e| EngineError::io(&self.config.workdir, e))?;
        self.index = Index::open(&self.config.state_dir)?;
        self.blobs = FsBlobStore::open(self.config.state_dir.join("blobs"))?;
        Ok(())
    }

    /// Materializes the chain prefix ending at `ref_`'s resolved hash and
    /// moves head there.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnresolvedRef`] if `ref_` cannot be resolved,
    /// or [`EngineError::LayerNotOnChain`] if the resolved hash is not in
    /// the current ancestry.
    pub fn checkout(&mut self, ref_: &str) -> Result<(), EngineError> {
        let hash = self.index.resolve(ref_)?;
        let chain = self.index.ancestry();
        let idx = chain
            .iter()
            .position(|l| l.hash == hash)
            .ok_or_else(|| EngineError::LayerNotOnChain(hash.to_hex()))?;
        snapshot::rebuild(&self.config.workdir, &self.blobs, &chain[..=idx])?;
        self.index.set_head(hash)?;
        Ok(())
    }

    /// Compares the live workdir against the state at head.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the workdir cannot be walked or the head
    /// state cannot be reconstructed.
    pub fn status(&self) -> Result<StateDiff, EngineError> {
        let current = snapshot::state(&self.config.workdir)?;
        let chain = self.index.ancestry();
        let head_state = snapshot::reconstruct_state(&self.blobs, &chain)?;
        Ok(StateDiff::compute(&head_state, &current))
    }

    /// Compares two resolved layer states. Defaults: `from` is the empty
    /// state, `to` is head.
    ///
    /// Each ref's state is reconstructed by walking *its own* ancestry back
    /// to root through the raw layer list — not by filtering the current
    /// head's chain — so a ref on a branch `checkout` has left unreachable
    /// from head (still addressable by hash) resolves to its own state
    /// rather than silently falling back to head's.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnresolvedRef`] if either ref fails to
    /// resolve, or any reconstruction I/O error.
    pub fn diff(&self, from: Option<&str>, to: Option<&str>) -> Result<StateDiff, EngineError> {
        let from_chain = match from {
            Some(r) => {
                let hash = self.index.resolve(r)?;
                self.index.ancestry_of(hash)
            }
            None => Vec::new(),
        };
        let to_chain = match to {
            Some(r) => {
                let hash = self.index.resolve(r)?;
                self.index.ancestry_of(hash)
            }
            None => self.index.ancestry(),
        };

        let from_state = snapshot::reconstruct_state(&self.blobs, &from_chain)?;
        let to_state = snapshot::reconstruct_state(&self.blobs, &to_chain)?;
        Ok(StateDiff::compute(&from_state, &to_state))
    }

    /// Creates or replaces tag `name` to point at `ref_`, or at head when
    /// `ref_` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NothingToTag`] if `ref_` is `None` and there
    /// is no head, or [`EngineError::UnresolvedRef`] if `ref_` is given but
    /// unresolvable.
    pub fn tag(&mut self, name: &str, ref_: Option<&str>) -> Result<LayerHash, EngineError> {
        let hash = match ref_ {
            Some(r) => self.index.resolve(r)?,
            None => self.index.head().ok_or(EngineError::NothingToTag)?,
        };
        self.index.set_tag(name, hash)?;
        Ok(hash)
    }

    /// All tags, name to hash.
    #[must_use]
    pub fn tags(&self) -> &std::collections::HashMap<String, LayerHash> {
        self.index.tags()
    }

    /// Resolves `ref_` and reports that layer's metadata and blob size.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnresolvedRef`] if `ref_` cannot be resolved.
    pub fn inspect(&self, ref_: &str) -> Result<LayerInfo, EngineError> {
        let hash = self.index.resolve(ref_)?;
        let layer = self
            .index
            .layers()
            .iter()
            .find(|l| l.hash == hash)
            .ok_or_else(|| EngineError::UnresolvedRef(ref_.to_string()))?;
        let size = self.blobs.size(&hash)?.unwrap_or_else(|| {
            warn!(%hash, "inspected layer has no blob on disk");
            0
        });
        Ok(LayerInfo {
            hash: layer.hash,
            instruction: layer.instruction.clone(),
            parent: layer.parent,
            time: layer.time,
            size,
        })
    }

    /// The chain from root to head, with hashes and parents — the raw
    /// material for a `history` rendering.
    #[must_use]
    pub fn history(&self) -> Vec<Layer> {
        self.index.ancestry()
    }

    /// Current head hash, or `None` if no layer has been created yet.
    #[must_use]
    pub fn head(&self) -> Option<LayerHash> {
        self.index.head()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
