/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: main.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 09:38:23
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-07 14:25:38
 */

mod command;
mod config;
mod credentials;
mod models;
mod process;
mod runner;
mod schedule;
mod store;
mod traits;

use crate::config::AppConfig;
use crate::credentials::AesCredentialCodec;
use crate::process::ProcessRunner;
use crate::runner::{FetchRunner, epoch_seconds};
use crate::schedule::{Decision, ScheduleGate};
use crate::store::JsonFileStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + 'static>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for w in &mut self.writers {
            let _ = w.write(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for w in &mut self.writers {
            let _ = w.flush();
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs due POP3 fetchers through mpop", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pass over all enabled fetchers (default)
    Run,
    /// Show lock and schedule state of every fetcher
    Status,
    /// Read a password from stdin and print its stored form
    EncryptPassword,
}

fn initialize_logger(config: &AppConfig) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();

    if let Some(level) = &config.log_level {
        builder.parse_filters(level);
    } else if let Ok(env_level) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_level);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file, e))?;

        if config.quiet {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        } else {
            let multi_writer = MultiWriter {
                writers: vec![Box::new(file), Box::new(std::io::stderr())],
            };
            builder.target(env_logger::Target::Pipe(Box::new(multi_writer)));
        }
    } else if config.quiet {
        builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
    }

    builder.init();
    Ok(())
}

async fn run_pass(config: AppConfig) -> anyhow::Result<()> {
    let fetchers = config.fetchers.clone();
    if fetchers.secret.is_empty() {
        warn!("No encryption secret configured, stored passwords cannot be decrypted");
    }

    let store = Arc::new(JsonFileStore::open(&config.store_path).await?);
    let runner = FetchRunner::new(
        fetchers.clone(),
        store.clone(),
        store,
        Arc::new(AesCredentialCodec::new(&fetchers.secret)),
        Arc::new(ProcessRunner::new(Duration::from_secs(
            fetchers.process_timeout_seconds,
        ))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Shutdown signal received (Ctrl+C). Stopping running fetchers...");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });

    runner.run_pass(shutdown_rx).await.map_err(|e| {
        error!("Fetcher pass aborted: {:#}", e);
        e
    })?;
    Ok(())
}

async fn print_status(config: AppConfig) -> anyhow::Result<()> {
    let store = JsonFileStore::open(&config.store_path).await?;
    let gate = ScheduleGate::new(config.fetchers.default_interval_minutes);
    let now = epoch_seconds();

    let data = store.snapshot().await?;
    for fetcher in &data.fetchers {
        let last_check = match DateTime::<Utc>::from_timestamp(
            fetcher.last_check_epoch_seconds as i64,
            0,
        ) {
            Some(ts) if fetcher.last_check_epoch_seconds > 0.0 => ts.to_rfc3339(),
            _ => "never".to_string(),
        };

        let state = if !fetcher.enabled {
            "disabled".to_string()
        } else {
            match gate.decide(fetcher, now) {
                Decision::Run => "due".to_string(),
                Decision::ReclaimStaleLock { held_for } => {
                    format!("stale lock ({}s)", held_for.floor())
                }
                Decision::Locked => "running".to_string(),
                Decision::TooSoon { elapsed, interval } => {
                    format!("next run in {}s", (interval - elapsed).ceil())
                }
            }
        };

        println!(
            "{:>6}  {:<30} {:<24} last check: {:<26} {}",
            fetcher.id,
            format!("{}:{}", fetcher.server, fetcher.port),
            fetcher.login,
            last_check,
            state
        );
    }
    Ok(())
}

fn encrypt_password(config: &AppConfig) -> anyhow::Result<()> {
    if config.fetchers.secret.is_empty() {
        anyhow::bail!("fetchers.secret must be configured to encrypt passwords");
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);

    let codec = AesCredentialCodec::new(&config.fetchers.secret);
    println!("{}", codec.encrypt(password)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => AppConfig::new_from_file(&path),
        None => AppConfig::new(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config: {:?}", e);
        if let Ok(path) = std::env::current_dir() {
            eprintln!("Current search path: {:?}", path);
        }
        eprintln!("Please create a `config.toml` or set APP_... environment variables, or specify a config file with --config.");
        std::process::exit(1);
    });

    initialize_logger(&config)?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting mail fetcher pass...");
            run_pass(config).await
        }
        Commands::Status => print_status(config).await,
        Commands::EncryptPassword => encrypt_password(&config),
    }
}
