use crate::{
    config::Config,
    state::{CounterDelta, LogLevel, TaskState},
    tracker::{client, RunReport, TaskTracker},
    util::ensure_dir,
    worker::{
        CheckpointLog, CheckpointedWorker, DryRunSink, IgnoreSet, JsonlSink, RecordSink,
        SourceError, WorkerOptions,
    },
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "import-tracker")]
#[command(about = "Resumable bulk record import with a live status and stop control plane")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./import-tracker.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a record file or a directory of them.
    Import {
        #[arg(long)]
        source: PathBuf,
        /// JSON-lines output file. Without it records are only validated.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Check for a stop request every N records.
        #[arg(long)]
        check_step: Option<u64>,
    },
    /// Run a dummy job that ticks until stopped.
    Demo {
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value_t = 3000)]
        interval_ms: u64,
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Ask a running tracker to stop.
    Stop {
        #[arg(long, default_value = "127.0.0.1:10086")]
        addr: String,
    },
    /// Print the ignore set the next import would start with.
    Ignores {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let mut cfg = match cfg_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Import {
            source,
            out,
            addr,
            port,
            check_step,
        } => {
            apply_tracker_overrides(&mut cfg, addr.as_deref(), *port);
            if let Some(step) = check_step {
                cfg.worker.check_step = *step;
            }
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            import(&cfg, source, out.as_deref())
        }
        Command::Demo {
            addr,
            port,
            interval_ms,
            ticks,
        } => {
            apply_tracker_overrides(&mut cfg, addr.as_deref(), *port);
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            demo(&cfg, Duration::from_millis(*interval_ms), *ticks)
        }
        Command::Stop { addr } => {
            let _guard = init_logging(&args, &cfg, None)?;
            stop(addr)
        }
        Command::Ignores {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            list_ignores(&cfg)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("import-tracker.toml");
    default.exists().then_some(default)
}

fn apply_tracker_overrides(cfg: &mut Config, addr: Option<&str>, port: Option<u16>) {
    if let Some(addr) = addr {
        cfg.tracker.addr = addr.to_string();
    }
    if let Some(port) = port {
        cfg.tracker.port = port;
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.log_dir).join("import-tracker.log"))
}

fn load_ignores(cfg: &Config) -> Result<IgnoreSet> {
    let ignore_file =
        (!cfg.paths.ignore_file.is_empty()).then(|| Path::new(&cfg.paths.ignore_file));
    IgnoreSet::rehydrate(ignore_file, Path::new(&cfg.paths.checkpoint_dir))
        .with_context(|| format!("loading ignore set from {}", cfg.paths.checkpoint_dir))
}

fn import(cfg: &Config, source: &Path, out: Option<&Path>) -> Result<()> {
    let ignores = load_ignores(cfg)?;
    info!("{} units will be skipped", ignores.len());

    let checkpoint_dir = Path::new(&cfg.paths.checkpoint_dir);
    let checkpoint = CheckpointLog::open(checkpoint_dir, std::process::id())
        .with_context(|| format!("opening checkpoint log in {}", checkpoint_dir.display()))?;
    info!("checkpoint log: {}", checkpoint.path().display());

    let report = match out {
        Some(out) => {
            let sink = JsonlSink::create(out, cfg.worker.key_field.as_str())
                .with_context(|| format!("opening output: {}", out.display()))?;
            run_import(cfg, source, &ignores, checkpoint, sink)?
        }
        None => {
            let sink = DryRunSink::new(cfg.worker.key_field.as_str());
            run_import(cfg, source, &ignores, checkpoint, sink)?
        }
    };
    print_summary(&report)
}

fn run_import<S: RecordSink + Send>(
    cfg: &Config,
    source: &Path,
    ignores: &IgnoreSet,
    checkpoint: CheckpointLog,
    sink: S,
) -> Result<RunReport> {
    let tracker = TaskTracker::new(cfg.tracker.clone(), Some(PathBuf::from(&cfg.paths.log_dir)));
    let opts = WorkerOptions::from_config(&cfg.worker);
    let report = tracker.run(|state| {
        let mut worker = CheckpointedWorker::new(state, ignores, checkpoint, sink, opts);
        worker.import_source(source)
    })?;
    Ok(report)
}

fn demo(cfg: &Config, interval: Duration, ticks: Option<u64>) -> Result<()> {
    let tracker = TaskTracker::new(cfg.tracker.clone(), Some(PathBuf::from(&cfg.paths.log_dir)));
    let report = tracker.run(|state| demo_task(state, interval, ticks))?;
    print_summary(&report)
}

/// Debug job: one log line and a counter bump per tick until stopped.
pub fn demo_task(
    state: &TaskState,
    interval: Duration,
    ticks: Option<u64>,
) -> Result<(), SourceError> {
    let mut tick = 0;
    while !state.stop_requested() && ticks.is_none_or(|max| tick < max) {
        tick += 1;
        state.log(LogLevel::Info, format!("Demo tick {tick}"));
        state.update_counters(CounterDelta {
            units: 1,
            records: 2,
            current_unit: Some(format!("tick-{tick}")),
            ..Default::default()
        });
        state.update_progress(tick % 100, Some(100));

        let deadline = Instant::now() + interval;
        while !state.stop_requested() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50).min(interval));
        }
    }
    Ok(())
}

fn stop(addr: &str) -> Result<()> {
    let reply = client::send_stop(addr, Duration::from_secs(5))
        .with_context(|| format!("sending stop to {addr}"))?;
    println!("{}", reply.status_line);
    if reply.status != 200 {
        bail!("stop rejected: {}", reply.status_line);
    }
    Ok(())
}

fn list_ignores(cfg: &Config) -> Result<()> {
    let ignores = load_ignores(cfg)?;
    for id in ignores.iter() {
        println!("{id}");
    }
    Ok(())
}

fn print_summary(report: &RunReport) -> Result<()> {
    let snap = &report.snapshot;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "outcome": report.outcome,
            "units_processed": snap.units_processed,
            "records_processed": snap.records_processed,
            "bytes_processed": snap.bytes_processed,
            "log": snap.log_path,
        }))?
    );
    Ok(())
}
