/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: runner.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 18:31:04
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-07 12:15:46
 */

use crate::command::{CommandBuilder, CommandError, MailboxLocation};
use crate::config::FetchersConfig;
use crate::credentials::{CredentialCodec, CredentialError};
use crate::models::{AccountId, FetcherField, FetcherId, FetcherRecord};
use crate::process::{CommandExecutor, ProcessError};
use crate::schedule::{Decision, ScheduleGate};
use crate::traits::{AccountDirectory, FetcherStore};
use anyhow::Context;
use futures::{StreamExt, stream};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

#[cfg(test)]
#[path = "./runner_tests.rs"]
mod runner_tests;

/// Why a single fetcher could not be processed in this pass.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetcher vanished before it could be processed")]
    Vanished,

    #[error("failed to read records: {0:#}")]
    Read(anyhow::Error),

    #[error("there is no mail account with identifier {0}")]
    AccountMissing(AccountId),

    #[error("cannot resolve mailbox: {0}")]
    Mailbox(CommandError),

    #[error("cannot decrypt password: {0}")]
    Credential(#[from] CredentialError),

    #[error("cannot build mpop command: {0}")]
    Command(#[from] CommandError),

    #[error("mpop failed: {0}")]
    Process(#[from] ProcessError),

    #[error("mpop exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("failed to persist fetcher state: {0:#}")]
    Persistence(anyhow::Error),
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// mpop ran and exited with 0.
    Success { duration: Duration },
    Failure(FetchError),
    /// Not due, or held by another run; nothing was written.
    Skipped(Decision),
    /// Disabled after the pass listed it.
    Disabled,
    /// The pass was stopped before or while this fetcher ran.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct PassSummary {
    pub outcomes: Vec<(FetcherId, FetchOutcome)>,
    pub duration: Duration,
}

impl PassSummary {
    fn count(&self, pred: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Success { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Failure(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Skipped(_) | FetchOutcome::Disabled))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Cancelled))
    }

    #[allow(dead_code)]
    pub fn outcome(&self, id: FetcherId) -> Option<&FetchOutcome> {
        self.outcomes.iter().find(|(i, _)| *i == id).map(|(_, o)| o)
    }
}

pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Current time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Runs one pass over all enabled fetchers: decide, lock, fetch, unlock.
pub struct FetchRunner {
    config: FetchersConfig,
    store: Arc<dyn FetcherStore>,
    accounts: Arc<dyn AccountDirectory>,
    codec: Arc<dyn CredentialCodec>,
    executor: Arc<dyn CommandExecutor>,
    builder: CommandBuilder,
    gate: ScheduleGate,
    clock: Clock,
}

impl FetchRunner {
    pub fn new(
        config: FetchersConfig,
        store: Arc<dyn FetcherStore>,
        accounts: Arc<dyn AccountDirectory>,
        codec: Arc<dyn CredentialCodec>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            builder: CommandBuilder::new(&config),
            gate: ScheduleGate::new(config.default_interval_minutes),
            config,
            store,
            accounts,
            codec,
            executor,
            clock: Arc::new(epoch_seconds),
        }
    }

    // For testing
    #[allow(dead_code)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[allow(dead_code)]
    pub fn gate(&self) -> &ScheduleGate {
        &self.gate
    }

    /// Processes every enabled fetcher once.
    ///
    /// Only configuration problems and a failure to list fetchers are
    /// returned as errors; everything that goes wrong with a single fetcher
    /// ends up in the summary.
    pub async fn run_pass(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<PassSummary> {
        let started = Instant::now();
        info!("Start fetcher pass");

        if !self.config.allow_fetchers {
            info!("Fetchers are not allowed, exiting...");
            return Ok(PassSummary::default());
        }

        self.config
            .validate()
            .context("Fetcher configuration is invalid")?;

        let fetchers = self
            .store
            .list_enabled_fetchers()
            .await
            .context("Failed to list fetchers")?;

        info!("{} enabled fetcher(s) to check", fetchers.len());

        let outcomes: Vec<(FetcherId, FetchOutcome)> = stream::iter(fetchers)
            .map(|listed| {
                let shutdown = shutdown.clone();
                async move {
                    let id = listed.id;
                    let outcome = self.process_fetcher(listed, shutdown).await;
                    report(id, &outcome);
                    (id, outcome)
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetchers.max(1))
            .collect()
            .await;

        let summary = PassSummary {
            outcomes,
            duration: started.elapsed(),
        };

        info!(
            "Fetcher pass finished in {:.3} sec: {} fetched, {} failed, {} skipped, {} cancelled",
            summary.duration.as_secs_f64(),
            summary.succeeded(),
            summary.failed(),
            summary.skipped(),
            summary.cancelled()
        );

        Ok(summary)
    }

    async fn process_fetcher(
        &self,
        listed: FetcherRecord,
        mut shutdown: watch::Receiver<bool>,
    ) -> FetchOutcome {
        if *shutdown.borrow() {
            return FetchOutcome::Cancelled;
        }

        // The listing may be stale by the time a worker gets to it.
        let mut record = match self.store.get_fetcher(listed.id).await {
            Ok(Some(record)) if record.enabled => record,
            Ok(Some(_)) => return FetchOutcome::Disabled,
            Ok(None) => return FetchOutcome::Failure(FetchError::Vanished),
            Err(e) => return FetchOutcome::Failure(FetchError::Read(e)),
        };
        let tag = record.tag();

        let account = match self.accounts.get_account_by_id(record.owner_account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return FetchOutcome::Failure(FetchError::AccountMissing(record.owner_account_id));
            }
            Err(e) => return FetchOutcome::Failure(FetchError::Read(e)),
        };

        let mailbox = match MailboxLocation::resolve(self.builder.data_folder(), &account.email) {
            Ok(mailbox) => mailbox,
            Err(e) => return FetchOutcome::Failure(FetchError::Mailbox(e)),
        };

        let now = (self.clock)();
        match self.gate.decide(&record, now) {
            decision @ Decision::Locked => {
                debug!("[{}] The fetching process is already running, skipping", tag);
                return FetchOutcome::Skipped(decision);
            }
            decision @ Decision::TooSoon { elapsed, interval } => {
                debug!(
                    "[{}] Last check was {} seconds ago, check interval is {} seconds, skipping",
                    tag,
                    elapsed.floor(),
                    interval
                );
                return FetchOutcome::Skipped(decision);
            }
            Decision::ReclaimStaleLock { held_for } => {
                warn!(
                    "[{}] Lock has been held for {} seconds, reclaiming it",
                    tag,
                    held_for.floor()
                );
            }
            Decision::Run => debug!("[{}] Mailbox is free, locking it", tag),
        }

        info!(
            "[{}] Fetch mail from {}:{}/{} - {}/{}",
            tag, record.server, record.port, record.login, mailbox.domain, mailbox.local_part
        );

        record.locked = true;
        record.last_check_epoch_seconds = now;
        if let Err(e) = self
            .store
            .update_fetcher(&record, &[FetcherField::Locked, FetcherField::LastCheck])
            .await
        {
            return FetchOutcome::Failure(FetchError::Persistence(e));
        }

        let cancelled = async {
            // A dropped sender means nobody can ask us to stop.
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let result = tokio::select! {
            result = self.fetch(&record, &mailbox) => Some(result),
            _ = cancelled => None,
        };

        match result {
            Some(result) => {
                record.locked = false;
                if let Err(e) = self
                    .store
                    .update_fetcher(&record, &[FetcherField::Locked])
                    .await
                {
                    if let Err(fetch_error) = &result {
                        error!("[{}] {}", tag, fetch_error);
                    }
                    return FetchOutcome::Failure(FetchError::Persistence(e));
                }
                debug!("[{}] Mailbox unlocked", tag);

                match result {
                    Ok(duration) => FetchOutcome::Success { duration },
                    Err(e) => FetchOutcome::Failure(e),
                }
            }
            None => {
                self.release_cancelled(&mut record, now).await;
                FetchOutcome::Cancelled
            }
        }
    }

    /// Decrypt, build and run. Everything in here happens while the lock is
    /// held; the caller unlocks whatever this returns.
    async fn fetch(
        &self,
        record: &FetcherRecord,
        mailbox: &MailboxLocation,
    ) -> Result<Duration, FetchError> {
        let tag = record.tag();
        let password = self.codec.decrypt(&record.password)?;
        let command = self.builder.build(record, mailbox, &password)?;
        drop(password);

        debug!("[{}] Execute mpop: {}", tag, command);
        let output = self.executor.run(&command).await?;

        if output.success() {
            for line in output.lines() {
                debug!("[{}] mpop: {}", tag, line);
            }
            Ok(output.duration)
        } else {
            for line in output.lines() {
                warn!("[{}] mpop: {}", tag, line);
            }
            Err(FetchError::NonZeroExit {
                code: output.exit_code,
            })
        }
    }

    /// Leaves a cancelled fetcher locked with an already stale timestamp, so
    /// the next pass reclaims it straight away. Without a stale window it is
    /// unlocked instead.
    async fn release_cancelled(&self, record: &mut FetcherRecord, now: f64) {
        let tag = record.tag();
        let fields: &[FetcherField] = match self.gate.stale_window_seconds(record) {
            Some(window) => {
                record.last_check_epoch_seconds = now - window - 1.0;
                &[FetcherField::LastCheck]
            }
            None => {
                record.locked = false;
                &[FetcherField::Locked]
            }
        };

        match self.store.update_fetcher(record, fields).await {
            Ok(()) => info!(
                "[{}] Cancelled, lock left for the next pass (locked: {})",
                tag, record.locked
            ),
            Err(e) => error!("[{}] Cancelled, failed to release lock: {:#}", tag, e),
        }
    }
}

fn report(id: FetcherId, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Success { duration } => {
            info!("[fetcher {}] Fetched in {:.3} sec", id, duration.as_secs_f64())
        }
        FetchOutcome::Failure(e @ FetchError::Vanished) => warn!("[fetcher {}] {}", id, e),
        FetchOutcome::Failure(e) => error!("[fetcher {}] {}", id, e),
        FetchOutcome::Skipped(_) => {}
        FetchOutcome::Disabled => debug!("[fetcher {}] Disabled since listing, skipped", id),
        FetchOutcome::Cancelled => info!("[fetcher {}] Cancelled", id),
    }
}
