//! sogrep-service
//!
//! Indexes the soname links databases of a package repository tree and
//! answers `GET /{soname}` with the packages that link against it.

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sogrep_core::ServiceConfig;
use sogrep_daemon::Service;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sogrep-service")]
#[command(about = "Soname to package lookup service for repository link databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the repository tree and serve lookups
    Serve(ServeArgs),

    /// Print a shell completion script to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Write man pages for every command into a directory
    Man {
        /// Directory to write the man pages to
        #[arg(long, default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on [default: localhost:8080]
    #[arg(long)]
    listen_address: Option<String>,

    /// Root of the repository tree [default: /srv/ftp]
    #[arg(long)]
    repository_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error [default: info]
    #[arg(long)]
    log_level: Option<String>,

    /// Prefix log lines with a timestamp [default: true]
    #[arg(long)]
    log_timestamp: Option<bool>,

    /// Config file (default: <config dir>/sogrep/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ServeArgs {
    /// Load the config file and apply command line overrides
    fn resolve(self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load_from(path)?,
            None => ServiceConfig::load()?,
        };

        if let Some(listen_address) = self.listen_address {
            config.listen_address = listen_address;
        }
        if let Some(repository_dir) = self.repository_dir {
            config.repository_dir = repository_dir;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(log_timestamp) = self.log_timestamp {
            config.log_timestamp = log_timestamp;
        }

        Ok(config)
    }
}

fn init_logging(level: &str, timestamp: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if timestamp {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}

/// Render a man page per command into `dir`
fn write_man_pages(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    clap_mangen::generate_to(Cli::command(), dir)
        .with_context(|| format!("Failed to write man pages to {}", dir.display()))?;
    Ok(())
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = args.resolve().context("Failed to load configuration")?;
    init_logging(&config.log_level, config.log_timestamp);

    tracing::info!("Starting sogrep-service v{}", env!("CARGO_PKG_VERSION"));

    let service = Service::new(config);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(service.serve())?;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => serve(args),
        Some(Commands::Completions { shell }) => {
            let mut command = Cli::command();
            clap_complete::generate(
                shell,
                &mut command,
                "sogrep-service",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        Some(Commands::Man { dir }) => write_man_pages(&dir),
        None => {
            Cli::command().print_help()?;
            std::process::exit(2);
        }
    }
}
