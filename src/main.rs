/*!
 * Depot CLI - build, inspect and synchronise content directories
 */

use clap::{Parser, Subcommand, ValueEnum};
use depot::{
    checksum::HashAlgorithm,
    config::{DepotConfig, LogLevel},
    error::{DepotError, Result, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
    output::{format_bytes, format_speed, OutputWriter},
    sync::{build_versions, collect_containers, diff, FileTransport, SyncOrchestrator, SyncStep},
    PackedStore, VersionManifest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "depot")]
#[command(version, about = "Versioned content packaging and resumable synchronisation", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info", global = true)]
    log_level: LogLevelArg,

    /// Log file path (JSON lines)
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Emit JSON lines instead of tables
    #[arg(long = "json", global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack containers into `res` and write the `ver` manifest
    Build {
        /// Directory holding the container files
        dir: PathBuf,

        /// Version number to stamp
        #[arg(long = "version")]
        version: i32,

        /// Container names relative to DIR (default: every file)
        #[arg(long = "container", value_name = "NAME")]
        containers: Vec<String>,

        /// Hash algorithm for content records
        #[arg(long = "algorithm", value_enum)]
        algorithm: Option<HashArg>,
    },

    /// Show the records of a packed store
    List {
        store: PathBuf,
    },

    /// Show which records of REMOTE would be fetched on top of BASE
    Diff {
        base: PathBuf,
        remote: PathBuf,

        /// Local packed store whose records also count as present
        #[arg(long = "store")]
        store: Option<PathBuf>,
    },

    /// Bring DEST up to date with SOURCE
    Sync {
        /// Remote root (directory or file:// URL)
        #[arg(short = 's', long = "source")]
        source: Option<String>,

        /// Local content directory
        #[arg(short = 'd', long = "dest")]
        dest: Option<PathBuf>,

        /// Shipped content to seed DEST from when it is newer
        #[arg(long = "base")]
        base: Option<PathBuf>,
    },

    /// Copy one record's payload out of a packed store
    Extract {
        store: PathBuf,
        name: String,

        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum HashArg {
    Sha256,
    Blake3,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Sha256 => HashAlgorithm::Sha256,
            HashArg::Blake3 => HashAlgorithm::Blake3,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            OutputWriter::new(false).error(&e.to_string());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => DepotConfig::from_file(path)?,
        None => DepotConfig::default(),
    };
    config.log_level = cli.log_level.into();
    config.verbose |= cli.verbose;
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let out = OutputWriter::new(cli.json);
    match cli.command {
        Commands::Build {
            dir,
            version,
            containers,
            algorithm,
        } => {
            let algorithm = algorithm
                .map(HashAlgorithm::from)
                .unwrap_or(config.sync.hash_algorithm);
            let names = if containers.is_empty() {
                collect_containers(&dir)?
            } else {
                containers
            };
            let manifest = build_versions(&dir, &names, version, algorithm)?;
            out.records(manifest.records.iter().map(|r| (r, None)));
            out.success(&format!(
                "Built version {} with {} containers",
                manifest.version,
                manifest.len().saturating_sub(1)
            ));
            Ok(EXIT_SUCCESS)
        }

        Commands::List { store } => {
            let store = PackedStore::load(&store)?;
            out.records(store.entries().map(|(r, offset)| (r, Some(offset))));
            out.info(&format!(
                "{} records, {}",
                store.len(),
                format_bytes(store.total_len())
            ));
            Ok(EXIT_SUCCESS)
        }

        Commands::Diff {
            base,
            remote,
            store,
        } => {
            let base = if base.exists() {
                VersionManifest::load(&base)?
            } else {
                VersionManifest::default()
            };
            let remote = VersionManifest::load(&remote)?;
            let store = store.map(PackedStore::load).transpose()?;

            let fetch = diff(&base, &remote, store.as_ref());
            out.records(fetch.iter().map(|r| (r, None)));
            let bytes: u64 = fetch.iter().map(|r| r.length).sum();
            out.info(&format!(
                "{} of {} records to fetch ({}), version {} -> {}",
                fetch.len(),
                remote.len().saturating_sub(1),
                format_bytes(bytes),
                base.version,
                remote.version
            ));
            Ok(EXIT_SUCCESS)
        }

        Commands::Sync { source, dest, base } => {
            if let Some(source) = source {
                config.sync.source_url = source;
            }
            if let Some(dest) = dest {
                config.sync.save_dir = dest;
            }
            config.validate()?;
            run_sync(&config, base, &out)
        }

        Commands::Extract {
            store,
            name,
            output,
        } => {
            let store = PackedStore::load(&store)?;
            let written = store.extract(&name, &output)?;
            out.success(&format!(
                "Extracted {} ({}) to {}",
                name,
                format_bytes(written),
                output.display()
            ));
            Ok(EXIT_SUCCESS)
        }
    }
}

fn run_sync(config: &DepotConfig, base: Option<PathBuf>, out: &OutputWriter) -> Result<i32> {
    let transport = Arc::new(FileTransport::new());
    let mut sync = SyncOrchestrator::new(config.sync.clone(), transport);
    if let Some(base) = base {
        if sync.seed_from_base(&base)? {
            out.info(&format!("Seeded {} from {}", config.sync.save_dir.display(), base.display()));
        }
        sync = sync.with_base_dir(base);
    }

    let bar = if out.is_json() {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .map_err(|e| DepotError::Config(e.to_string()))?
            .progress_chars("#>-"),
    );
    let progress_bar = bar.clone();
    sync.on_progress(Box::new(move |position, size, speed| {
        progress_bar.set_length(size);
        progress_bar.set_position(position);
        progress_bar.set_message(format_speed(speed as u64));
    }));

    sync.start()?;
    loop {
        match sync.tick() {
            SyncStep::Download => {
                bar.set_length(sync.downloader().size());
                bar.set_position(sync.downloader().position());
            }
            step if step.is_terminal() => break,
            _ => {}
        }
        std::thread::sleep(TICK_INTERVAL);
    }
    bar.finish_and_clear();

    match sync.step() {
        SyncStep::Completed => {
            out.success(&format!(
                "Up to date at version {} ({} items fetched)",
                sync.local_version(),
                sync.planned().len()
            ));
        }
        _ => {
            for failure in sync.failures() {
                out.error(&failure.to_string());
            }
        }
    }

    let code = sync.exit_code();
    if code == EXIT_PARTIAL {
        out.warning("Some items were not synchronised; run again to resume");
    }
    Ok(code)
}
