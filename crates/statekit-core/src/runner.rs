// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The subprocess contract: execute an opaque instruction string in the
//! working directory and report success/failure.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::EngineError;

/// Executes a shell instruction in a working directory.
///
/// This is the one collaborator the core treats as an external contract
/// rather than something it owns: any type satisfying this trait can stand
/// in for [`ShellRunner`], which is useful for testing `Engine` without
/// spawning real processes.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `instruction` with `workdir` as the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandFailed`] if the process exits with a
    /// non-zero status, or [`EngineError::Io`] if it cannot be spawned.
    async fn exec(&self, instruction: &str, workdir: &Path) -> Result<(), EngineError>;
}

/// The default [`Runner`]: `sh -c <instruction>` on POSIX, with `HOME`
/// overridden to `workdir` so that tools writing to `~/.cache` and similar
/// are captured by the snapshot. Stdout/stderr pass through to the caller —
/// the core never captures them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

#[async_trait]
impl Runner for ShellRunner {
    async fn exec(&self, instruction: &str, workdir: &Path) -> Result<(), EngineError> {
        debug!(%instruction, workdir = %workdir.display(), "spawning instruction");
        let status = Command::new("sh")
            .arg("-c")
            .arg(instruction)
            .current_dir(workdir)
            .env("HOME", workdir)
            .status()
            .await
            .map_err(|e| EngineError::io(workdir, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                code: status.code().unwrap_or(-1),
                instruction: instruction.to_string(),
            })
        }
    }
}
