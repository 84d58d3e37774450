//! Running external commands.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Run `program` with `args` and wait for it to exit.
///
/// Returns the exit code (`None` if killed by a signal), or a description of
/// why the program could not be spawned. The child is killed if the returned
/// future is dropped before it exits.
pub async fn exit_code<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Option<i32>, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let status = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to run {}: {}", program.to_string_lossy(), e))?;

    debug!(program = %program.to_string_lossy(), code = ?status.code(), "Command exited");
    Ok(status.code())
}

/// Run `program` with `args`, failing unless it exits with status 0.
///
/// The error carries the exit status and the tail of stderr.
pub async fn run_checked<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<(), String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {}", program.to_string_lossy(), e))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();
    let mut message = format!("{} exited with {}", program.to_string_lossy(), output.status);
    if !detail.is_empty() {
        message.push_str(": ");
        message.push_str(&detail);
    }
    Err(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_checked_success() {
        assert!(run_checked("true", std::iter::empty::<&str>()).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let err = run_checked("sh", ["-c", "echo boom >&2; exit 3"]).await.unwrap_err();
        assert!(err.contains("boom"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_checked("/nonexistent/replicant-test", ["start"]).await.unwrap_err();
        assert!(err.starts_with("failed to run"));
    }

    #[tokio::test]
    async fn test_exit_code() {
        let code = exit_code("sh", ["-c", "exit 3"]).await.unwrap();
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_abandoned_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch '{}'", marker.display());

        let result =
            tokio::time::timeout(Duration::from_millis(100), exit_code("sh", ["-c", script.as_str()])).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
