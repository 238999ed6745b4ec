// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core value types: content hashes, relative paths, and filesystem
//! fingerprints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// A 32-byte SHA-256 digest, used both as a layer identity and as a blob key.
///
/// Thin newtype over `[u8; 32]`, following the `BlobHash` pattern: the inner
/// bytes are public for zero-cost access, `Display` renders lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerHash(pub [u8; 32]);

impl LayerHash {
    /// View the hash as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The first 12 hex characters, the "short hash" form used by `history`
    /// and `inspect` output.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_string();
        full[..12].to_string()
    }

    /// Hash raw bytes into a `LayerHash`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Full lowercase hex string, without allocating through `Display`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LayerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LayerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerHash({self})")
    }
}

impl FromStr for LayerHash {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EngineError::UnresolvedRef(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in out.iter_mut().enumerate() {
            let byte_str = &s[i * 2..i * 2 + 2];
            *chunk = u8::from_str_radix(byte_str, 16)
                .map_err(|_| EngineError::UnresolvedRef(s.to_string()))?;
        }
        Ok(Self(out))
    }
}

impl Serialize for LayerHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LayerHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A path relative to a walk root, guaranteed forward-slash-separated with no
/// leading slash and no `.`/`..` components.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelPath(String);

impl RelPath {
    /// Build a `RelPath` from an already-normalized forward-slash string.
    ///
    /// Callers (the walker) are responsible for normalization; this is not a
    /// parser for arbitrary user input.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-path summary used to compare filesystem states without re-reading raw
/// bytes repeatedly.
///
/// Tagged variant per the filesystem-fingerprint redesign: a directory, a
/// symlink (with its target), or a regular file (content hash).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fingerprint {
    /// A directory entry. Mode bits are not tracked for directories.
    Dir,
    /// A symlink entry and its target.
    Symlink(String),
    /// A regular file, its content hash and POSIX mode bits.
    File {
        /// SHA-256 of the file's contents.
        hash: LayerHash,
        /// POSIX permission bits (e.g. `0o644`).
        mode: u32,
    },
}

impl Fingerprint {
    /// The content hash this fingerprint compares equal on, ignoring mode
    /// bits — used by diff/status to decide whether a file changed.
    #[must_use]
    pub fn content_key(&self) -> String {
        match self {
            Self::Dir => "dir".to_string(),
            Self::Symlink(target) => format!("link:{target}"),
            Self::File { hash, .. } => hash.to_string(),
        }
    }
}

/// One immutable record of "what changed in the workdir due to one
/// instruction."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// SHA-256 of the layer's hashed-bytes definition (see the snapshot
    /// module for exactly what is hashed).
    pub hash: LayerHash,
    /// The shell-level instruction that produced this layer.
    pub instruction: String,
    /// Hash of the preceding layer, or `None` for the root layer.
    pub parent: Option<LayerHash>,
    /// Creation instant, milliseconds since the Unix epoch.
    pub time: u64,
}

/// Compute the cache key for `(instruction, parent)`.
///
/// `K = SHA-256(canonical-json({"instruction": instruction, "parent":
/// parent}))`. Canonical JSON here is an object with exactly those two keys
/// in that insertion order, standard string escaping, no whitespace —
/// `serde_json::to_string` already produces this shape for a struct with
/// fields declared in this order, so no custom writer is needed.
#[must_use]
pub fn cache_key(instruction: &str, parent: Option<&LayerHash>) -> LayerHash {
    #[derive(Serialize)]
    struct CacheKeyInput<'a> {
        instruction: &'a str,
        parent: Option<String>,
    }

    let input = CacheKeyInput {
        instruction,
        parent: parent.map(ToString::to_string),
    };
    // `serde_json::to_vec` never emits whitespace and preserves field order,
    // which is exactly the canonical encoding this key is defined over.
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    LayerHash::of(&bytes)
}
