//! External command execution for the CLI-driven backends.

use std::ffi::OsStr;
use std::process::Stdio;

use strata_core::error::{Result, StrataError};
use tokio::process::Command;

/// Maximum stderr characters carried into an error message.
const MAX_ERROR_OUTPUT: usize = 2048;

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one program with a fixed environment.
///
/// The child is killed if the returned future is dropped, so a cancelled
/// build does not leave the tool running.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    env: Vec<(String, String)>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect();
        tracing::debug!(program = %self.program, args = ?args, "Running command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let output = cmd.output().await.map_err(|e| StrataError::BackendError {
            backend: self.program.clone(),
            message: format!("failed to run {}: {}", self.program, e),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(StrataError::BackendError {
                backend: self.program.clone(),
                message: format!(
                    "{} {} exited with {}: {}",
                    self.program,
                    args.first().map(String::as_str).unwrap_or_default(),
                    output.status,
                    tail(stderr.trim(), MAX_ERROR_OUTPUT)
                ),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }

    /// Run and parse stdout as JSON.
    pub async fn run_json<I, S>(&self, args: I) -> Result<serde_json::Value>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args).await?;
        serde_json::from_str(&output.stdout).map_err(|e| StrataError::BackendError {
            backend: self.program.clone(),
            message: format!("unexpected output from {}: {}", self.program, e),
        })
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
