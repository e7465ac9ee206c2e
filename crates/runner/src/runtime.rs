//! Container runtime seam.
//!
//! The runtime answers which services are running and executes remediation
//! commands. [`CommandRuntime`] shells out to the configured program vectors;
//! tests substitute their own implementation.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use healthgate_core::manifest::RuntimeConfig;

use crate::util::{elapsed_ms, ms};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime command is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub argv: Vec<String>,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Names of the services currently running.
    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError>;

    /// Run one program vector to completion.
    async fn execute(&self, argv: &[String], timeout: Duration)
        -> Result<CommandOutcome, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct CommandRuntime {
    list_command: Vec<String>,
    timeout: Duration,
}

impl CommandRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            list_command: config.list_command.clone(),
            timeout: ms(config.timeout_ms),
        }
    }
}

#[async_trait]
impl Runtime for CommandRuntime {
    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError> {
        let out = run_command(&self.list_command, self.timeout).await?;
        if !out.success() {
            return Err(RuntimeError::Failed {
                program: self.list_command.first().cloned().unwrap_or_default(),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(parse_service_list(&out.stdout))
    }

    async fn execute(
        &self,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome, RuntimeError> {
        run_command(argv, timeout).await
    }
}

/// One service name per line; blank lines ignored.
pub fn parse_service_list(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn run_command(
    argv: &[String],
    timeout: Duration,
) -> Result<CommandOutcome, RuntimeError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RuntimeError::EmptyCommand);
    };
    let started = tokio::time::Instant::now();

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RuntimeError::Spawn {
            program: program.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(RuntimeError::Spawn {
                program: program.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(RuntimeError::Timeout {
                program: program.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    let outcome = CommandOutcome {
        argv: argv.to_vec(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: elapsed_ms(started),
    };
    tracing::debug!(
        program = %program,
        code = ?outcome.code,
        duration_ms = outcome.duration_ms,
        "command finished"
    );
    Ok(outcome)
}
