//! Remote Test Harness - device test runner CLI.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rth::api::http::HttpBuildApi;
use rth::bundle::NutBundler;
use rth::scheduler::DeviceTestScheduler;
use rth_common::HarnessConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rth")]
#[command(author, version, about = "Remote Test Harness - run device test suites remotely")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovered test files against the configured devices
    Test {
        /// Path to the harness config file
        #[arg(short, long, default_value = rth_common::CONFIG_FILE_NAME)]
        config: PathBuf,

        /// Abort the run on the first failure
        #[arg(long)]
        stop_on_failure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Test {
            config,
            stop_on_failure,
        } => {
            let mut config = HarnessConfig::load(&config)?;
            if stop_on_failure {
                config.stop_on_failure = true;
            }

            let project_root = std::env::current_dir().context("cannot resolve working directory")?;
            let api = HttpBuildApi::new(&config.api.base, &config.api.key)?;
            let bundler = NutBundler::new(config.agent_file.clone(), config.device_file.clone());

            let mut scheduler = DeviceTestScheduler::new(config, project_root, api, bundler);
            let success = scheduler.run().await?;
            std::process::exit(if success { 0 } else { 1 });
        }
    }
}
