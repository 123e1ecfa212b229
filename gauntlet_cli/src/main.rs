mod progress;
mod targets;

use gauntlet_core::config::{GauntletConfig, IsolationKind};
use gauntlet_core::corpus::CorpusRegistry;
use gauntlet_core::invoker;
use gauntlet_core::observer::TracingObserver;
use gauntlet_core::orchestrator::FuzzOrchestrator;
use gauntlet_core::report::FuzzReport;
use gauntlet_core::runner::FuzzRunner;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use progress::ConsoleObserver;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG_FILE: &str = "gauntlet.toml";
const BUILTIN_CORPUS_NAME: &str = "built-in naughty strings";

/// Used when no corpus is configured.
const BUILTIN_CORPUS: &[&str] = &[
    "",
    " ",
    "undefined",
    "null",
    "NaN",
    "-1",
    "0",
    "99999999999999999999",
    "1e309",
    "%s%s%s%s",
    "%n%n%n",
    "%x%x%x",
    "{0}",
    "../../etc/passwd",
    "..\\..\\windows\\win.ini",
    "/dev/null",
    "file.py",
    "2024-02-29",
    "2023-02-29",
    "\0",
    "\u{feff}",
    "\u{202e}reversed",
    "Ω≈ç√∫",
    "<script>alert(1)</script>",
    "'; DROP TABLE users; --",
    "\r\n\r\n",
];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum IsolationArg {
    Process,
    Thread,
}

impl From<IsolationArg> for IsolationKind {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::Process => IsolationKind::Process,
            IsolationArg::Thread => IsolationKind::Thread,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Per-invocation deadline in milliseconds.
    #[clap(long)]
    timeout_ms: Option<u64>,
    #[clap(long, value_enum)]
    isolation: Option<IsolationArg>,
    /// Only fuzz the named target; may be repeated.
    #[clap(short, long = "target")]
    targets: Vec<String>,
    /// Also write the report as JSON to this path.
    #[clap(long)]
    report: Option<PathBuf>,
    #[clap(long, default_value = "info")]
    log_level: String,
    /// Show a live progress line on stderr.
    #[clap(long)]
    progress: bool,
    /// Exit with status 1 if any invocation failed.
    #[clap(long)]
    fail_on_findings: bool,
}

fn resolve_config(cli: &Cli, default_path: &Path) -> Result<GauntletConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            tracing::info!(path = ?config_path, "loading configuration");
            GauntletConfig::load_from_file(config_path)?
        }
        None if default_path.exists() => {
            tracing::info!(path = ?default_path, "loading default configuration");
            GauntletConfig::load_from_file(default_path)?
        }
        None => {
            tracing::info!("no configuration file found, using built-in defaults");
            GauntletConfig::default()
        }
    };

    if let Some(timeout_ms) = cli.timeout_ms {
        config.fuzzer.timeout_ms = timeout_ms;
    }
    if let Some(isolation) = cli.isolation {
        config.fuzzer.isolation = isolation.into();
    }
    config.fuzzer.timeout()?;
    Ok(config)
}

fn build_registry(config: &GauntletConfig) -> Result<CorpusRegistry, anyhow::Error> {
    let mut registry = CorpusRegistry::new();
    registry.load_sources(&config.corpus)?;
    if registry.is_empty() {
        let items = BUILTIN_CORPUS.iter().map(|s| s.to_string()).collect();
        registry.register(BUILTIN_CORPUS_NAME, items)?;
    }
    Ok(registry)
}

fn main() -> Result<ExitCode, anyhow::Error> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = resolve_config(&cli, Path::new(DEFAULT_CONFIG_FILE))?;
    tracing::debug!(config = ?config, "effective configuration");

    let targets = targets::select(&cli.targets)?;
    let registry = build_registry(&config)?;
    let runner = FuzzRunner::new(invoker::from_settings(&config.fuzzer), config.fuzzer.timeout()?);

    let mut orchestrator =
        FuzzOrchestrator::new(registry, runner).with_observer(Box::new(TracingObserver));
    if cli.progress {
        orchestrator.add_observer(Box::new(ConsoleObserver::new()));
    }

    orchestrator.run_all(&targets)?;

    let report = FuzzReport::from_orchestrator(&orchestrator);
    println!("{report}");
    if let Some(path) = &cli.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write JSON report to {path:?}"))?;
        tracing::info!(path = ?path, "wrote JSON report");
    }

    if cli.fail_on_findings && report.has_findings() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
