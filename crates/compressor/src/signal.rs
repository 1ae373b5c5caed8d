use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

/// Ask a process to stop, giving it the chance to clean up
///
/// Sends SIGTERM on Unix and a non-forced `taskkill` on Windows. The forced
/// kill is done through the child handle by the caller.
pub async fn request_graceful_stop(pid: u32) -> Result<()> {
    let mut cmd = graceful_stop_command(pid);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to run stop command for pid {}", pid))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "Stop request for pid {} failed (exit code {}): {}",
            pid,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    Ok(())
}

#[cfg(unix)]
fn graceful_stop_command(pid: u32) -> Command {
    let mut cmd = Command::new("kill");
    cmd.arg("-TERM").arg(pid.to_string());
    cmd
}

#[cfg(windows)]
fn graceful_stop_command(pid: u32) -> Command {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string()]).creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn test_graceful_stop_terminates_child() {
        let mut child = match Command::new("sleep").arg("30").stdout(Stdio::null()).spawn() {
            Ok(c) => c,
            Err(_) => {
                println!("sleep not available, skipping");
                return;
            }
        };
        let pid = child.id().unwrap();

        if request_graceful_stop(pid).await.is_err() {
            println!("kill not available, skipping");
            child.kill().await.unwrap();
            return;
        }

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after SIGTERM")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_stop_unknown_pid_is_an_error() {
        // One above the kernel's PID_MAX_LIMIT
        assert!(request_graceful_stop(4_194_305).await.is_err());
    }
}
