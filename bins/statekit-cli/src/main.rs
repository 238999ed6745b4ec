// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! statekit CLI
//!
//! Command-line shell over `statekit-core`: parses arguments, resolves
//! environment variables, and prints results. No business logic lives here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use statekit_core::{Engine, EngineConfig, RunOutcome};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the index and blob store (env: STATEKIT_DIR /
    /// SEQUENTIAL_MACHINE_DIR, default `.statekit`)
    #[clap(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Working directory instructions run against (env: STATEKIT_WORK /
    /// SEQUENTIAL_MACHINE_WORK, default `<state-dir>/work`)
    #[clap(long, global = true)]
    workdir: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an instruction, creating a layer or replaying a cache hit.
    Run {
        /// Shell instruction to execute.
        instruction: String,
    },
    /// Run an instruction without recording a layer.
    Exec {
        /// Shell instruction to execute.
        instruction: String,
    },
    /// Run a sequence of instructions in order, stopping at the first
    /// failure.
    Batch {
        /// Shell instructions to execute, in order.
        instructions: Vec<String>,
    },
    /// Show the chain of layers from root to head.
    History,
    /// Compare the live workdir against the state at head.
    Status,
    /// Compare two resolved refs (defaults: empty state and head).
    Diff {
        /// Ref to compare from (default: the empty state).
        from: Option<String>,
        /// Ref to compare to (default: head).
        to: Option<String>,
    },
    /// Materialize a ref's state into the workdir and move head there.
    Checkout {
        /// Tag name, hash prefix, or exact hash.
        reference: String,
    },
    /// Create or replace a tag pointing at a ref (default: head).
    Tag {
        /// Tag name.
        name: String,
        /// Ref to tag (default: head).
        reference: Option<String>,
    },
    /// List all tags.
    Tags,
    /// Show a layer's instruction, parent, timestamp, and blob size.
    Inspect {
        /// Tag name, hash prefix, or exact hash.
        reference: String,
    },
    /// Reconstruct the workdir from the full chain, root to head.
    Rebuild,
    /// Delete all engine state and start over with an empty chain.
    Reset,
    /// Print the current head hash, if any.
    Head,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let state_dir = args.state_dir.or_else(|| env_path("STATEKIT_DIR", "SEQUENTIAL_MACHINE_DIR"));
    let workdir = args.workdir.or_else(|| env_path("STATEKIT_WORK", "SEQUENTIAL_MACHINE_WORK"));
    let config = EngineConfig::resolve(state_dir, workdir).context("resolving engine configuration")?;
    let mut engine = Engine::open(config).context("opening engine")?;

    match args.command {
        Command::Run { instruction } => {
            let outcome = engine.run(&instruction).await.context("running instruction")?;
            print_outcome(&outcome);
        }
        Command::Exec { instruction } => {
            engine.exec(&instruction).await.context("executing instruction")?;
        }
        Command::Batch { instructions } => {
            let outcomes = engine.batch(&instructions).await.context("running batch")?;
            for outcome in &outcomes {
                print_outcome(outcome);
            }
        }
        Command::History => {
            for layer in engine.history() {
                println!(
                    "{}  {}  {}",
                    layer.hash.short(),
                    layer.parent.map_or_else(|| "-".repeat(12), |p| p.short()),
                    layer.instruction
                );
            }
        }
        Command::Status => {
            print_diff(&engine.status().context("computing status")?);
        }
        Command::Diff { from, to } => {
            let diff = engine
                .diff(from.as_deref(), to.as_deref())
                .context("computing diff")?;
            print_diff(&diff);
        }
        Command::Checkout { reference } => {
            engine.checkout(&reference).context("checking out ref")?;
            println!("checked out {reference}");
        }
        Command::Tag { name, reference } => {
            let hash = engine
                .tag(&name, reference.as_deref())
                .context("tagging ref")?;
            println!("{name} -> {}", hash.short());
        }
        Command::Tags => {
            let mut tags: Vec<(&String, &statekit_core::LayerHash)> = engine.tags().iter().collect();
            tags.sort_by_key(|(name, _)| name.to_string());
            for (name, hash) in tags {
                println!("{name}  {}", hash.short());
            }
        }
        Command::Inspect { reference } => {
            let info = engine.inspect(&reference).context("inspecting ref")?;
            println!("hash:        {}", info.hash);
            println!(
                "parent:      {}",
                info.parent.map_or_else(|| "-".to_string(), |p| p.to_hex())
            );
            println!("instruction: {}", info.instruction);
            println!("time:        {}", info.time);
            println!("size:        {} bytes", info.size);
        }
        Command::Rebuild => {
            let count = engine.rebuild().context("rebuilding workdir")?;
            println!("rebuilt {count} layer(s)");
        }
        Command::Reset => {
            engine.reset().context("resetting engine state")?;
            println!("reset");
        }
        Command::Head => match engine.head() {
            Some(hash) => println!("{}", hash.short()),
            None => println!("(empty)"),
        },
    }

    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Created { hash } => println!("created {}", hash.short()),
        RunOutcome::Cached { hash } => println!("cached  {}", hash.short()),
        RunOutcome::Empty { head } => println!(
            "empty   (head unchanged: {})",
            head.map_or_else(|| "-".to_string(), |h| h.short())
        ),
    }
}

fn print_diff(diff: &statekit_core::StateDiff) {
    if diff.is_clean() {
        println!("clean");
        return;
    }
    for path in &diff.added {
        println!("+ {path}");
    }
    for path in &diff.modified {
        println!("~ {path}");
    }
    for path in &diff.deleted {
        println!("- {path}");
    }
}

fn env_path(primary: &str, fallback: &str) -> Option<PathBuf> {
    std::env::var_os(primary)
        .or_else(|| std::env::var_os(fallback))
        .map(PathBuf::from)
}
