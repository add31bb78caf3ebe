//! Spawns the `card-controls` helper with a timeout and captures its output.

use cardsense_core::error::{CardsenseError, CardsenseResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
/// Binary path and timeout used for every helper invocation.
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
/// Collected stdout, stderr, and exit status of a finished helper call.
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandRunner {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    pub fn binary(&self) -> &Path {
        &self.path
    }

    /// Run the helper with `args`. A call that outlives the timeout is killed.
    pub async fn run(&self, args: &[&str]) -> CardsenseResult<Output> {
        let mut command = Command::new(&self.path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CardsenseError::ControlsTimeout {
                operation: format!("{} {}", self.path.display(), args.join(" ")),
                millis: self.timeout.as_millis() as u64,
            })??;

        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}
