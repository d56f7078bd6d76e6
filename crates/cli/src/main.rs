use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::error;
use trellis::{CallResultExt, ConfiguredPlugin, PluginKind, PluginManager};
use trellis_core::Config;
use trellis_core::logging::{self, LogFormat, LoggingConfig, LoggingGuard};

/// Trellis - load and drive C, C++, Lua and Python plugins
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Load plugins written in C, C++, Lua and Python behind one interface", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Log level for stderr output (default: config's [logging] level, or warn)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty, json or compact
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Try to load plugins and report which ones load
    Check {
        /// Scripts or shared libraries to load
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Backend to load with (default: guessed from the file extension)
        #[arg(short, long, value_name = "KIND")]
        kind: Option<PluginKind>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the configured plugins, call initialize() once, then loop(counter) on every plugin
    Run {
        /// Path to trellis.toml
        #[arg(short, long, value_name = "PATH", default_value = "trellis.toml")]
        config: PathBuf,

        /// Number of loop rounds
        #[arg(short = 'n', long, default_value_t = 10)]
        iterations: u32,

        /// Pause between rounds in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 500)]
        interval_ms: u64,
    },
    /// Write an example trellis.toml
    Init {
        /// Where to write the manifest
        #[arg(short, long, value_name = "PATH", default_value = "trellis.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Outcome of loading one plugin with `trellis check`
#[derive(Debug, Serialize)]
struct CheckReport {
    path: PathBuf,
    kind: Option<PluginKind>,
    loaded: bool,
    error: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { paths, kind, json } => {
            let _guard = init_logging(LoggingConfig::default(), cli.log_level, cli.log_format)?;
            cmd_check(&paths, kind, json)?
        }
        Commands::Run { config, iterations, interval_ms } => {
            let config = load_config(&config)?;
            let _guard = init_logging(LoggingConfig::from(config.logging.clone()), cli.log_level, cli.log_format)?;
            cmd_run(&config, iterations, Duration::from_millis(interval_ms))?
        }
        Commands::Init { path, force } => cmd_init(&path, force)?,
    }

    Ok(())
}

/// Install the stderr subscriber, letting command-line flags override the configured level and format
fn init_logging(config: LoggingConfig, level: Option<String>, format: Option<LogFormat>) -> Result<LoggingGuard> {
    logging::init_logging(Some(config.with_overrides(level, format))).context("Failed to initialize logging")
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Config not found at {}; run `trellis init` to create one", path.display());
    }
    Config::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Load every path and collect the outcome
fn check_plugins(paths: &[PathBuf], kind: Option<PluginKind>) -> Vec<CheckReport> {
    let mut manager = PluginManager::new();
    paths
        .iter()
        .map(|path| {
            let Some(kind) = kind.or_else(|| PluginKind::from_path(path)) else {
                return CheckReport {
                    path: path.clone(),
                    kind: None,
                    loaded: false,
                    error: Some("cannot guess the plugin kind; pass --kind".to_string()),
                };
            };
            let (loaded, error) = match manager.load(kind, path) {
                Ok(plugin) => (plugin.is_loaded(), None),
                Err(e) => (false, Some(e.to_string())),
            };
            CheckReport { path: path.clone(), kind: Some(kind), loaded, error }
        })
        .collect()
}

fn cmd_check(paths: &[PathBuf], kind: Option<PluginKind>, json: bool) -> Result<()> {
    let reports = check_plugins(paths, kind);

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let kind = report.kind.map(|kind| kind.as_str()).unwrap_or("?");
            match &report.error {
                None => println!("{} {} ({})", "Loaded:".green().bold(), report.path.display(), kind.cyan()),
                Some(e) => println!("{} {} ({}): {}", "Failed:".red().bold(), report.path.display(), kind.cyan(), e),
            }
        }
    }

    let failed = reports.iter().filter(|report| !report.loaded).count();
    if failed > 0 {
        anyhow::bail!("{} of {} plugins failed to load", failed, reports.len());
    }
    Ok(())
}

/// Call `name` on a configured plugin, going through the crash guard when the entry asks for it.
///
/// Failures are logged and counted; they never stop the run.
fn call_plugin(configured: &mut ConfiguredPlugin, name: &str, counter: Option<i32>) -> bool {
    // SAFETY: native plugins driven by `trellis run` export `void initialize(void)` and `void loop(int)`.
    let result = unsafe {
        match (counter, configured.crash_guard) {
            (None, false) => configured.plugin.call::<(), _>(name, ()),
            (None, true) => configured.plugin.safe_call::<(), _>(name, ()),
            (Some(counter), false) => configured.plugin.call::<(), _>(name, (counter,)),
            (Some(counter), true) => configured.plugin.safe_call::<(), _>(name, (counter,)),
        }
    };
    if result.is_err() {
        error!(plugin = %configured.name, function = name, error = %result.error_output(), "plugin call failed");
    }
    result.is_ok()
}

/// Drive all configured plugins; returns the number of failed calls
fn run_plugins(config: &Config, iterations: u32, interval: Duration) -> Result<usize> {
    let mut manager = PluginManager::with_config(config);
    let mut plugins = manager.load_configured(config).context("Failed to load plugins")?;

    let mut failed = 0;
    for configured in &mut plugins {
        if !call_plugin(configured, "initialize", None) {
            failed += 1;
        }
    }

    for round in 0..iterations {
        let counter = i32::try_from(round).unwrap_or(i32::MAX);
        for configured in &mut plugins {
            if !call_plugin(configured, "loop", Some(counter)) {
                failed += 1;
            }
        }
        if round + 1 < iterations && !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    Ok(failed)
}

fn cmd_run(config: &Config, iterations: u32, interval: Duration) -> Result<()> {
    println!("{} Running {} plugins", "Info:".blue().bold(), config.plugins.len().to_string().cyan());
    for entry in &config.plugins {
        println!("  - {} ({})", entry.name.cyan(), entry.kind);
    }

    let failed = run_plugins(config, iterations, interval)?;

    if failed == 0 {
        println!("{} Completed {} rounds", "Success:".green().bold(), iterations);
    } else {
        println!("{} Completed {} rounds with {} failed calls", "Warning:".yellow().bold(), iterations, failed);
    }
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite it", path.display());
    }

    std::fs::write(path, Config::example()).context("Failed to write config")?;
    println!("{} Created config at {}", "Success:".green().bold(), path.display());
    Ok(())
}
