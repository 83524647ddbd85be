/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: process.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 09:18:36
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-06 10:02:57
 */

use crate::command::FetchCommand;
use async_trait::async_trait;
use log::{debug, warn};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}, process killed")]
    Timeout(Duration),

    #[error("failed to collect process output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty output lines from both streams, stdout first.
    pub fn lines(&self) -> Vec<&str> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// Runs a built fetch command to completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &FetchCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns the command directly (no shell) and waits at most `timeout`.
///
/// The child is spawned with `kill_on_drop`, so dropping the future (timeout
/// or cancellation of the pass) terminates it.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ProcessRunner {
    async fn run(&self, command: &FetchCommand) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Command timed out after {:?}: {}", self.timeout, command);
                return Err(ProcessError::Timeout(self.timeout));
            }
        };

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };

        debug!(
            "Command finished with exit code {} in {:?} ({} bytes stdout, {} bytes stderr)",
            result.exit_code,
            result.duration,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }
}
