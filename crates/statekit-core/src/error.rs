// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error kinds for `statekit-core`.

use std::path::PathBuf;

/// Errors surfaced by the [`crate::engine::Engine`] and its collaborators.
///
/// The core never retries and never swallows an error; the only silent
/// outcomes are the `Empty` variant of [`crate::engine::RunOutcome`] and a
/// no-op restore of a zero-byte blob, both of which are documented results,
/// not errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The instruction's subprocess exited with a non-zero status. No layer
    /// is recorded for a failed run.
    #[error("command failed with exit code {code}: {instruction}")]
    CommandFailed {
        /// Process exit code, or -1 if the process was terminated by signal.
        code: i32,
        /// The instruction that was executed.
        instruction: String,
    },

    /// No tag, hash prefix, or exact hash matched the given ref, or a prefix
    /// matched more than one layer.
    #[error("could not resolve ref {0:?}")]
    UnresolvedRef(String),

    /// `checkout` target is not in the current ancestry (chain from root to
    /// head).
    #[error("layer {0} is not on the current chain")]
    LayerNotOnChain(String),

    /// `tag` was called with no ref and no existing head to tag.
    #[error("nothing to tag: no ref given and history is empty")]
    NothingToTag,

    /// Underlying filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// The path the failing operation was acting on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The index document failed to parse or violated an invariant.
    #[error("corrupt index at {path}: {source}")]
    CorruptIndex {
        /// Path to the index document.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored blob's bytes did not match its declared hash, or the archive
    /// could not be decoded.
    #[error("corrupt blob {hash}: {reason}")]
    CorruptBlob {
        /// Hash of the blob that failed integrity checking.
        hash: String,
        /// Human-readable description of the failure.
        reason: String,
    },
}

impl EngineError {
    /// Wrap an I/O error with the path that was being operated on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
