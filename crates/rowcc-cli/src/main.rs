//! Command-line driver: load a config, spin up the worker pool against
//! the demo `Test` workload, and run until termination or Ctrl-C.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;

use cli::{Cli, Commands};
use rowcc_common::config::Config;
use rowcc_runtime::{DemoWorkload, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rowcc=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Check { config } => check(&config).await?,
        Commands::Version => {
            println!("rowcc {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run(config_path: Option<String>) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load(&path).await?,
        None => Config::default(),
    };
    config.validate()?;

    info!(
        thread_cnt = config.worker.thread_cnt,
        cc_alg = ?config.row_lock.cc_alg,
        "starting rowcc"
    );

    let workload = Arc::new(DemoWorkload::new(&config));
    let pool = WorkerPool::spawn(workload, &config);
    let sim_done = pool.sim_done_flag();

    let join = tokio::task::spawn_blocking(move || pool.join());

    tokio::select! {
        result = join => {
            let (commits, aborts) = result.map_err(|e| anyhow::anyhow!(e))?;
            info!(commits, aborts, "workload finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping worker pool");
            sim_done.store(true, Ordering::Release);
        }
    }

    Ok(())
}

async fn check(config_path: &str) -> Result<()> {
    let config = Config::load(config_path).await?;
    config.validate()?;
    println!("{config_path}: OK");
    Ok(())
}
