//! Hard-timeout phase execution
//!
//! The unit of execution is a child process. On timeout the child is killed
//! before the runner returns, so pending writes inside the phase never reach
//! the outside world after cancellation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// A phase handler expressed as an executable command.
#[derive(Debug, Clone)]
pub struct PhaseCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl PhaseCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Result of one phase execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl PhaseOutcome {
    fn success() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.reason.as_deref() == Some("timeout")
    }
}

/// Execute `command` in an isolated process, enforcing `timeout`.
///
/// Returns success on a clean zero exit, `"timeout"` after a forced kill,
/// and the failure reason otherwise.
pub async fn run_with_timeout(command: &PhaseCommand, timeout: Duration) -> PhaseOutcome {
    debug!(
        program = %command.program,
        args = ?command.args,
        ?timeout,
        "running phase command"
    );

    let mut builder = Command::new(&command.program);
    builder
        .args(&command.args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in &command.env {
        builder.env(key, value);
    }
    if let Some(dir) = &command.working_dir {
        builder.current_dir(dir);
    }

    let mut child = match builder.spawn() {
        Ok(child) => child,
        Err(e) => return PhaseOutcome::failure(format!("spawn failed: {e}")),
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => PhaseOutcome::success(),
        Ok(Ok(status)) => PhaseOutcome::failure(format!("exit status {status}")),
        Ok(Err(e)) => PhaseOutcome::failure(format!("wait failed: {e}")),
        Err(_) => {
            // Deadline passed: kill the child and reap it so no side effect
            // survives the cancellation.
            if let Err(e) = child.start_kill() {
                warn!("failed to kill timed-out phase process: {e}");
            }
            let _ = child.wait().await;
            PhaseOutcome::failure("timeout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_exit_succeeds() {
        let outcome = run_with_timeout(
            &PhaseCommand::new("sh").args(["-c", "exit 0"]),
            Duration::from_secs(5),
        )
        .await;
        assert!(outcome.ok);
        assert_eq!(outcome.reason, None);
    }

    #[tokio::test]
    async fn nonzero_exit_reports_status() {
        let outcome = run_with_timeout(
            &PhaseCommand::new("sh").args(["-c", "exit 3"]),
            Duration::from_secs(5),
        )
        .await;
        assert!(!outcome.ok);
        assert!(outcome.reason.unwrap().contains("exit status"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child_and_suppresses_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late-write");
        let script = format!("sleep 5 && touch {}", marker.display());

        let started = std::time::Instant::now();
        let outcome = run_with_timeout(
            &PhaseCommand::new("sh").args(["-c", &script]),
            Duration::from_millis(100),
        )
        .await;

        assert!(!outcome.ok);
        assert!(outcome.timed_out());
        assert!(started.elapsed() < Duration::from_secs(3));

        // The child is dead; its pending write never lands.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let outcome = run_with_timeout(
            &PhaseCommand::new("definitely-not-a-real-binary-xyz"),
            Duration::from_secs(1),
        )
        .await;
        assert!(!outcome.ok);
        assert!(outcome.reason.unwrap().contains("spawn failed"));
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with_timeout(
            &PhaseCommand::new("sh")
                .args(["-c", "test \"$PHASE_TOKEN\" = expected && test -d ."])
                .env("PHASE_TOKEN", "expected")
                .working_dir(dir.path()),
            Duration::from_secs(5),
        )
        .await;
        assert!(outcome.ok, "{:?}", outcome.reason);
    }
}
