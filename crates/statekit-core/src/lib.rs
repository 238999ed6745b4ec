// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent, content-addressed compute over a working directory.
//!
//! A [`engine::Engine`] runs shell instructions against a workdir and
//! records each one's filesystem effect as an immutable [`types::Layer`],
//! keyed by a hash of the instruction and its parent. Re-issuing the same
//! instruction from the same parent replays the cached layer instead of
//! re-running the command — the same workdir state for the same inputs,
//! without re-paying the cost of producing it.
//!
//! This crate holds no process-global state: every [`engine::Engine`] owns
//! its own [`index::Index`] and [`blob_store::BlobStore`], so embedding
//! more than one in a process (e.g. one per repository) is safe.

/// Write-once content-addressed blob storage.
pub mod blob_store;
/// Orchestration: `run`/`checkout`/`rebuild`/`status`/`diff`/`tag`/etc.
pub mod engine;
/// The `EngineError` enum shared by every collaborator.
pub mod error;
/// The layer catalog, head pointer, and tags.
pub mod index;
/// The subprocess contract.
pub mod runner;
/// Filesystem walking, fingerprinting, and TAR pack/unpack.
pub mod snapshot;
/// Core value types: content hashes, relative paths, fingerprints.
pub mod types;

pub use blob_store::{BlobStore, FsBlobStore};
pub use engine::{Engine, EngineConfig, LayerInfo, RunOutcome, StateDiff};
pub use error::EngineError;
pub use index::Index;
pub use runner::{Runner, ShellRunner};
pub use types::{Fingerprint, Layer, LayerHash, RelPath};
