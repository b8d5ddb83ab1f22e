//! profkeep agent CLI.
//!
//! - `run`: enable continuous capture in this process and keep it alive
//! - `list`: show stored snapshots, newest first
//! - `sweep`: apply retention to a snapshot directory now
//!
//! Command payloads are JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use pk_core::config::{AgentConfig, StorageSpec};
use pk_core::exit_codes::ExitCode;
use pk_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use pk_core::{enable_capture, global_registry, NativeRuntime, TracingLogger, Trigger};
use pk_storage::FileStorage;
use serde::Serialize;
use tracing::{debug, error, info};

/// profkeep - continuous in-process profiling agent
#[derive(Parser)]
#[command(name = "pk-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable continuous capture and keep the process alive
    Run(RunArgs),

    /// List stored snapshots
    List(ListArgs),

    /// Remove expired snapshots now
    Sweep(SweepArgs),
}

// ============================================================================
// Command argument structs
// ============================================================================

/// Storage overrides shared by every command.
#[derive(Args, Debug, Default)]
struct StorageArgs {
    /// Snapshot directory (overrides PPROF_DIR and the config file)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Snapshot file-name prefix (overrides PPROF_PREFIX and the config file)
    #[arg(long)]
    prefix: Option<String>,

    /// Retention, e.g. "36h" (overrides PPROF_TTL and the config file)
    #[arg(long, value_parser = humantime::parse_duration)]
    ttl: Option<Duration>,
}

impl StorageArgs {
    fn spec(&self) -> StorageSpec {
        StorageSpec {
            dir: self.dir.clone(),
            prefix: self.prefix.clone(),
            ttl: self.ttl,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Agent config file (TOML)
    #[arg(long, env = "PK_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    storage: StorageArgs,

    /// Use a fixed-interval trigger instead of the configured one
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Exit after this long (default: run until killed)
    #[arg(long = "for", value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Burn CPU and contend on a lock so snapshots have content
    #[arg(long)]
    workload: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Snapshot directory (overrides PPROF_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Only show snapshots with this prefix
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Snapshot directory (overrides PPROF_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Retention, e.g. "36h" (overrides PPROF_TTL)
    #[arg(long, value_parser = humantime::parse_duration)]
    ttl: Option<Duration>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Info.louder()),
            _ => Some(LogLevel::Trace),
        }
    };
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match cli.command {
        Commands::Run(args) => run_capture(&args),
        Commands::List(args) => run_list(&args),
        Commands::Sweep(args) => run_sweep(&args),
    };

    exit_code.into()
}

// ============================================================================
// Command implementations
// ============================================================================

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Clean
        }
        Err(e) => {
            error!(error = %e, "failed to serialize output");
            ExitCode::InternalError
        }
    }
}

#[derive(Serialize)]
struct RunSummary {
    profiles: Vec<&'static str>,
    trigger: &'static str,
    dir: PathBuf,
    prefix: String,
    ttl_secs: u64,
}

#[derive(Serialize)]
struct RunResult {
    cycles: u64,
    wait_failures: u64,
}

fn run_capture(args: &RunArgs) -> ExitCode {
    let config = match &args.config {
        Some(path) => match AgentConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "cannot load agent config");
                eprintln!("pk-core: {}", e);
                return ExitCode::ArgsError;
            }
        },
        None => AgentConfig::default(),
    };

    let settings = config.storage_settings(&args.storage.spec(), env_lookup);
    let mut options = config
        .capture_options(settings.clone())
        .with_logger(Arc::new(TracingLogger));
    if let Some(interval) = args.interval {
        options = options.with_trigger(Trigger::fixed(interval));
    }

    let summary = RunSummary {
        profiles: options.profiles.iter().map(|p| p.name()).collect(),
        trigger: options.trigger.as_ref().map(Trigger::kind).unwrap_or("none"),
        dir: settings.dir.clone(),
        prefix: settings.prefix.clone(),
        ttl_secs: settings.ttl.as_secs(),
    };

    if let Err(e) = enable_capture(options) {
        error!(error = %e, "cannot enable capture");
        eprintln!("pk-core: {}", e);
        return e.exit_code();
    }
    info!(dir = %settings.dir.display(), prefix = %settings.prefix, "capturing");

    let code = print_json(&summary);
    if code != ExitCode::Clean {
        return code;
    }

    if args.workload {
        if let Err(e) = spawn_workload() {
            error!(error = %e, "cannot start workload threads");
            return ExitCode::InternalError;
        }
    }

    match args.run_for {
        Some(duration) => {
            thread::sleep(duration);
            let result = global_registry()
                .status()
                .map(|status| RunResult {
                    cycles: status.cycles(),
                    wait_failures: status.wait_failures(),
                })
                .unwrap_or(RunResult {
                    cycles: 0,
                    wait_failures: 0,
                });
            print_json(&result)
        }
        None => loop {
            thread::park();
        },
    }
}

/// Two threads hashing numbers and fighting over one lock.
fn spawn_workload() -> std::io::Result<()> {
    let shared = Arc::new(Mutex::new(0u64));
    for worker in 0..2 {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("pk-workload-{}", worker))
            .spawn(move || {
                let runtime = NativeRuntime::global();
                let mut x: u64 = worker + 1;
                loop {
                    for _ in 0..100_000 {
                        x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    }
                    let asked = Instant::now();
                    let mut total = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    let waited = asked.elapsed();
                    if waited > Duration::from_micros(1) {
                        runtime.record_mutex("workload.shared", waited);
                    }
                    *total = total.wrapping_add(x);
                    drop(total);

                    let slept = Instant::now();
                    thread::sleep(Duration::from_millis(1));
                    runtime.record_block("workload.sleep", slept.elapsed());
                }
            })?;
    }
    debug!("workload threads started");
    Ok(())
}

fn run_list(args: &ListArgs) -> ExitCode {
    let cli = StorageSpec {
        dir: args.dir.clone(),
        ..Default::default()
    };
    let settings = AgentConfig::default().storage_settings(&cli, env_lookup);
    let storage = FileStorage::from_settings(settings);

    let snapshots = match storage.list() {
        Ok(snapshots) => snapshots,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            error!(dir = %storage.dir().display(), error = %e, "cannot list snapshots");
            return ExitCode::IoError;
        }
    };
    let snapshots: Vec<_> = snapshots
        .into_iter()
        .filter(|s| args.prefix.as_deref().is_none_or(|p| s.prefix == p))
        .collect();
    print_json(&snapshots)
}

fn run_sweep(args: &SweepArgs) -> ExitCode {
    let cli = StorageSpec {
        dir: args.dir.clone(),
        ttl: args.ttl,
        ..Default::default()
    };
    let settings = AgentConfig::default().storage_settings(&cli, env_lookup);
    let storage = FileStorage::from_settings(settings);
    let report = storage.sweep();
    info!(
        dir = %storage.dir().display(),
        removed = report.removed.len(),
        bytes_freed = report.bytes_freed,
        "sweep finished"
    );
    print_json(&report)
}
