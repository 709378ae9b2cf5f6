//! lintwire CLI - drives an analysis language server over a batch of files.
//!
//! ```text
//! main() -> Cli::parse() -> load config -> AnalysisServer::start()
//!                                            |
//!                                            v
//!                          analyze(files) | rules -> shutdown()
//! ```
//!
//! Exit status: 0 when no issue was reported, 1 when at least one was,
//! 2 on any error.

mod args;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lintwire_config::LintwireConfig;
use lintwire_lsp::{
    AnalysisServer, DebugLog, FileDebugLog, NoDebugLog, RuleSelection, ServerConfig,
    SessionOptions,
};

use crate::args::{Cli, CliCommand};

const EXIT_ISSUES_FOUND: u8 = 1;
const EXIT_ERROR: u8 = 2;

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // stdout carries the report; logs go to stderr only.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Everything needed to start one server, after flags are merged over config.
struct Launch {
    server: ServerConfig,
    rules: RuleSelection,
    options: SessionOptions,
    debug_log: Option<PathBuf>,
}

impl Launch {
    fn resolve(cli: &Cli, config: &LintwireConfig) -> Result<Self> {
        Ok(Self {
            server: config.server_config()?,
            rules: config.rule_selection(&cli.enable_rules, &cli.disable_rules),
            options: config.session_options(),
            debug_log: cli.debug_log.clone().or_else(|| config.debug_log_path()),
        })
    }

    fn open_debug_log(&self) -> Result<Box<dyn DebugLog>> {
        match &self.debug_log {
            Some(path) => Ok(Box::new(FileDebugLog::open(path)?)),
            None => Ok(Box::new(NoDebugLog)),
        }
    }

    async fn start(&self) -> Result<AnalysisServer> {
        let debug_log = self.open_debug_log()?;
        AnalysisServer::start(
            &self.server,
            self.rules.clone(),
            self.options.clone(),
            debug_log,
        )
        .await
        .with_context(|| format!("starting analysis server {}", self.server.command))
    }
}

fn load_config(cli: &Cli) -> Result<LintwireConfig> {
    match &cli.config {
        Some(path) => Ok(LintwireConfig::load_from(path)?),
        None => Ok(LintwireConfig::load()?.unwrap_or_default()),
    }
}

/// Returns whether any issue was found.
async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli)?;
    let launch = Launch::resolve(&cli, &config)?;
    let mut server = launch.start().await?;

    match cli.command {
        CliCommand::Analyze { files } => {
            let result = server.analyze(&files).await;
            server.shutdown().await;
            let report = result?;
            for line in report.lines() {
                println!("{line}");
            }
            Ok(report.issues_found())
        }
        CliCommand::Rules => {
            for rule in server.rules() {
                println!("{rule} {}", launch.rules.level(rule).as_str());
            }
            server.shutdown().await;
            Ok(false)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(EXIT_ISSUES_FOUND),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
