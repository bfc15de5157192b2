//! RooDB GTID operator tool
//!
//! Usage:
//!   roodb-gtid normalize <set>
//!   roodb-gtid union <a> <b>
//!   roodb-gtid subtract <a> <b>
//!   roodb-gtid contains <set> <gtid>
//!   roodb-gtid stress [--threads N] [--gtids M] [--transactions T]
//!
//! Exit codes:
//!   0 - Success (`contains`: the GTID is in the set)
//!   1 - `contains`: the GTID is not in the set
//!   2 - Invalid input
//!   3 - Stress run failed

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use roodb_gtid::gtid::{is_valid_gno, GtidError, GtidSet, NextGtid, SidMap, StatementVerdict};
use roodb_gtid::server::handler::{run_transaction, set_gtid_next, StatementError};
use roodb_gtid::{GtidConfig, ServerContext};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect GTID sets and exercise GTID ownership")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a GTID set in canonical form
    Normalize { set: String },
    /// Print the union of two GTID sets
    Union { a: String, b: String },
    /// Print `a` minus `b`
    Subtract { a: String, b: String },
    /// Check whether `<uuid>:<gno>` is in a set
    Contains { set: String, gtid: String },
    /// Run concurrent sessions against one GTID state and print its snapshot
    Stress {
        #[arg(long, default_value_t = 8, env = "ROODB_STRESS_THREADS")]
        threads: usize,
        /// Explicit GTIDs are drawn from 1..=gtids of the server source
        #[arg(long, default_value_t = 200)]
        gtids: i64,
        /// Transactions per thread
        #[arg(long, default_value_t = 500)]
        transactions: usize,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let code = match Cli::parse().command {
        Command::Normalize { set } => print_set(|map| GtidSet::from_text(&set, map)),
        Command::Union { a, b } => print_set(|map| {
            let mut set = GtidSet::from_text(&a, map)?;
            set.add_gtid_set(&GtidSet::from_text(&b, map)?)?;
            Ok(set)
        }),
        Command::Subtract { a, b } => print_set(|map| {
            let mut set = GtidSet::from_text(&a, map)?;
            set.remove_gtid_set(&GtidSet::from_text(&b, map)?)?;
            Ok(set)
        }),
        Command::Contains { set, gtid } => contains(&set, &gtid),
        Command::Stress {
            threads,
            gtids,
            transactions,
        } => stress(threads, gtids, transactions).await,
    };
    std::process::exit(code);
}

fn print_set(build: impl FnOnce(&mut SidMap) -> Result<GtidSet, GtidError>) -> i32 {
    let mut map = SidMap::new();
    match build(&mut map) {
        Ok(set) => {
            println!("{}", set.to_text(&map));
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            2
        }
    }
}

fn contains(set: &str, gtid: &str) -> i32 {
    let mut map = SidMap::new();
    let parsed = GtidSet::from_text(set, &mut map)
        .and_then(|set| Ok((set, NextGtid::parse(gtid, &mut map)?)));
    match parsed {
        Ok((set, NextGtid::Explicit(gtid))) => {
            if set.contains_gtid(gtid) {
                println!("yes");
                0
            } else {
                println!("no");
                1
            }
        }
        Ok(_) => {
            eprintln!("ERROR: expected <uuid>:<gno>, got '{}'", gtid);
            2
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            2
        }
    }
}

#[derive(Default)]
struct StressCounters {
    executed: AtomicU64,
    skipped: AtomicU64,
    rolled_back: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
}

async fn stress(threads: usize, gtids: i64, transactions: usize) -> i32 {
    if !is_valid_gno(gtids) {
        eprintln!("ERROR: --gtids must be a valid GNO");
        return 2;
    }
    let config = match GtidConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 2;
        }
    };
    let server = match ServerContext::init(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 3;
        }
    };
    let counters = Arc::new(StressCounters::default());

    tracing::info!(threads, gtids, transactions, "Starting GTID stress run");

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let server = Arc::clone(&server);
            let counters = Arc::clone(&counters);
            tokio::task::spawn_blocking(move || stress_worker(&server, &counters, gtids, transactions))
        })
        .collect();

    let joined = async {
        let mut failures = 0;
        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("ERROR: worker failed: {}", e);
                    failures += 1;
                }
                Err(e) => {
                    eprintln!("ERROR: worker panicked: {}", e);
                    failures += 1;
                }
            }
        }
        failures
    };
    tokio::pin!(joined);

    let failures = tokio::select! {
        failures = &mut joined => failures,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down GTID state");
            server.shutdown();
            joined.await
        }
    };

    let snapshot = match server.gtid_state().snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 3;
        }
    };
    let report = serde_json::json!({
        "executed": counters.executed.load(Ordering::Relaxed),
        "skipped": counters.skipped.load(Ordering::Relaxed),
        "rolled_back": counters.rolled_back.load(Ordering::Relaxed),
        "rejected": counters.rejected.load(Ordering::Relaxed),
        "cancelled": counters.cancelled.load(Ordering::Relaxed),
        "state": snapshot,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 3;
        }
    }

    if failures > 0 || !report["state"]["owned"].as_array().is_some_and(Vec::is_empty) {
        return 3;
    }
    0
}

fn stress_worker(
    server: &ServerContext,
    counters: &StressCounters,
    gtids: i64,
    transactions: usize,
) -> Result<(), StatementError> {
    let state = server.gtid_state();
    let server_uuid = state.server_sid();
    let mut session = server.new_session();
    let mut rng = rand::thread_rng();

    for _ in 0..transactions {
        if state.is_shutting_down() {
            break;
        }
        let directive = if rng.gen_bool(0.7) {
            format!("{}:{}", server_uuid, rng.gen_range(1..=gtids))
        } else {
            "AUTOMATIC".to_string()
        };
        set_gtid_next(state, &mut session, &directive)?;

        let fail = rng.gen_bool(0.1);
        match run_transaction(state, &mut session, |_| {
            if fail {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }) {
            Ok(StatementVerdict::Skip) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                counters.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(StatementError::Execution(_)) => {
                counters.rolled_back.fetch_add(1, Ordering::Relaxed);
            }
            Err(StatementError::Rejected(_)) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(StatementError::Gtid(GtidError::Cancelled(_))) => {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
