//! `chronicle`: operator CLI for agent chronicles.
//!
//! Every subcommand maps onto one engine operation.  Events are printed as
//! one canonical JSON object per line, so output can be piped back into
//! other tools.  Errors go to stderr prefixed with their stable code, and
//! the process exits with status 1.
//!
//! Usage:
//!   chronicle append runs/plan-1.ndjson --actor-type planner \
//!       --payload '{"type":"PlanDrafted","planId":"plan-1","title":"t","steps":[]}'
//!   chronicle read runs/plan-1.ndjson --kind PlanDrafted
//!   chronicle tail runs/plan-1.ndjson -n 5
//!   chronicle analyze runs/plan-1.ndjson --json
//!   chronicle repair runs/plan-1.ndjson --no-backup
//!   chronicle clean-locks --root runs

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::{ChronicleEvent, EventKind, EventPayload},
    Actor,
};
use chronicle_core::canonicalize;
use chronicle_store::{format_analysis_report, Chronicle, ChronicleConfig};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Append to, inspect, and repair hash-chained agent chronicles.
#[derive(Parser)]
#[command(
    name = "chronicle",
    about = "Append-only, hash-chained event log for autonomous agents",
    long_about = "Reads and writes NDJSON chronicles.  Every append is linked to the\n\
                  current tail under a cross-process lock; analysis and repair\n\
                  check and restore the causal chain."
)]
struct Cli {
    /// TOML configuration file (root, allowed extensions, lock and repair settings).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Link an event onto the chain and append it; prints the stored event.
    Append {
        path: PathBuf,
        /// Event payload as JSON, including its `type` tag.
        #[arg(long)]
        payload: String,
        #[arg(long)]
        actor_type: String,
        /// Defaults to a freshly generated id.
        #[arg(long)]
        actor_id: Option<String>,
    },
    /// Print every event in file order.
    Read {
        path: PathBuf,
        /// Only events of this type (e.g. `PlanApproved`).
        #[arg(long)]
        kind: Option<String>,
    },
    /// Print the last N events.
    Tail {
        path: PathBuf,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Check duplicates, chain links, event ids and corrupt lines.
    Analyze {
        path: PathBuf,
        /// Emit the analysis as JSON instead of a report.
        #[arg(long)]
        json: bool,
    },
    /// Rewrite the chronicle as a clean chain (starts a new epoch).
    Repair {
        path: PathBuf,
        /// Do not copy the original aside first.
        #[arg(long)]
        no_backup: bool,
    },
    /// Remove abandoned lock sidecars.
    CleanLocks {
        /// Directory to sweep; defaults to the configured root.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for lock and append tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error [{}]: {}", e.code(), e);
        process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> ChronicleResult<ChronicleConfig> {
    match path {
        Some(path) => ChronicleConfig::from_file(path),
        None => Ok(ChronicleConfig::default()),
    }
}

fn run(cli: Cli) -> ChronicleResult<()> {
    let config = load_config(cli.config.as_ref())?;
    let chronicle = Chronicle::new(config);

    match cli.command {
        Command::Append {
            path,
            payload,
            actor_type,
            actor_id,
        } => {
            let payload: EventPayload = serde_json::from_str(&payload).map_err(|e| {
                ChronicleError::validation(format!("payload is not a valid event: {}", e))
            })?;
            let actor = match actor_id {
                Some(id) => Actor::new(actor_type, id),
                None => Actor::spawn(actor_type),
            };
            let stored = chronicle.record(&path, actor, payload)?;
            debug!(event_id = %stored.event_id, "appended");
            print_event(&stored)
        }
        Command::Read { path, kind } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            for event in chronicle.read_chronicle(&path)? {
                if kind.map_or(true, |k| event.kind() == k) {
                    print_event(&event)?;
                }
            }
            Ok(())
        }
        Command::Tail { path, count } => {
            for event in chronicle.tail_chronicle(&path, count)? {
                print_event(&event)?;
            }
            Ok(())
        }
        Command::Analyze { path, json } => {
            let analysis = chronicle.analyze_chronicle(&path)?;
            if json {
                println!("{}", to_json(&analysis)?);
            } else {
                println!("{}", format_analysis_report(&analysis));
            }
            Ok(())
        }
        Command::Repair { path, no_backup } => {
            let backup = if no_backup { Some(false) } else { None };
            let result = chronicle.repair_chronicle(&path, backup)?;
            println!("{}", to_json(&result)?);
            Ok(())
        }
        Command::CleanLocks { root } => {
            let removed = match root {
                Some(root) => chronicle.clean_stale_locks_under(&root)?,
                None => chronicle.clean_stale_locks()?,
            };
            for path in removed {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn parse_kind(tag: &str) -> ChronicleResult<EventKind> {
    EventKind::parse(tag).ok_or_else(|| {
        ChronicleError::validation(format!(
            "unknown event type '{}'; expected one of: {}",
            tag,
            EventKind::ALL
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

fn print_event(event: &ChronicleEvent) -> ChronicleResult<()> {
    println!("{}", canonicalize(event)?);
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> ChronicleResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ChronicleError::validation(format!("failed to serialize output: {}", e)))
}
