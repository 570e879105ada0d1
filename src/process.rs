//! One-shot subprocess execution with captured output.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::errors::LaunchError;

/// Working directory and extra environment for [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
}

impl RunOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program` to completion and capture both output streams.
///
/// A non-zero exit status is returned as a normal [`ProcessOutput`]; only a
/// failure to start the process is an error.
pub async fn run<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    options: &RunOptions,
) -> Result<ProcessOutput, LaunchError> {
    let program = program.as_ref();
    let shown = program.to_string_lossy().into_owned();
    let rendered_args: Vec<String> = args
        .iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();
    tracing::info!("Running '{} {}'", shown, rendered_args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            log_streams("", "");
            tracing::error!("Error: failed to launch '{}': {}", shown, source);
            return Err(LaunchError::Spawn {
                program: shown,
                source,
            });
        }
    };

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| LaunchError::Wait {
            program: shown.clone(),
            source,
        })?;

    let result = ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    };
    log_streams(&result.stdout, &result.stderr);
    tracing::info!("'{}' finished with {}", shown, output.status);

    Ok(result)
}

fn log_streams(stdout: &str, stderr: &str) {
    tracing::info!("┌──── Begin stdout ────┐");
    tracing::info!("{}", stdout);
    tracing::info!("└──── End stdout ──────┘");
    tracing::info!("┌──── Begin stderr ────┐");
    tracing::info!("{}", stderr);
    tracing::info!("└──── End stderr ──────┘");
}
