mod init;
mod run;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use sim_config::{ConfigLoader, SimConfig};
use sim_core::{Result, SimError};

/// Simulacra: a town of generative agents, one tick at a time
#[derive(Parser)]
#[command(name = "simulacra", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to simulacra.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation (scheduler + conversation loop)
    Run {
        /// Stop after this many ticks (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        ticks: Option<u64>,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a default simulacra.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Show version and build info
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Init writes the file the loader would otherwise warn about
        if let Commands::Init { force } = self.command {
            init_tracing(&self.log_level(None), "pretty");
            return init::cmd_init(force);
        }

        // Load config first so we can use it for log format; its findings are
        // reported once tracing is up
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();
        init_tracing(&self.log_level(Some(&config)), &config.logging.format);
        config_loader.report();

        match self.command {
            Commands::Run { ticks } => run::cmd_run(config, ticks).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
            Commands::Version => Self::cmd_version(),
            Commands::Init { .. } => Ok(()),
        }
    }

    /// --verbose > --quiet > --log-level > config > "info". `RUST_LOG` beats all of them.
    fn log_level(&self, config: Option<&SimConfig>) -> String {
        if self.verbose {
            "debug".into()
        } else if self.quiet {
            "error".into()
        } else if let Some(level) = &self.log_level {
            level.clone()
        } else {
            config.map_or_else(|| "info".into(), |c| c.logging.level.clone())
        }
    }

    fn cmd_config(config: SimConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config)
                    .map_err(|e| SimError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("simulacra v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "simulacra", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
