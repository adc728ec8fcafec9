//! Subprocess helpers shared by the probe and transform operations.

use tokio::process::Command;

use rf_domain::{Error, Result};

/// Run ffmpeg with the given arguments, failing with the last stderr line.
pub async fn run_ffmpeg(args: &[String]) -> Result<()> {
    tracing::debug!(args = ?args, "running ffmpeg");

    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Other(format!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(stderr = %stderr, "ffmpeg failed");
        return Err(Error::Other(format!(
            "ffmpeg failed: {}",
            stderr.lines().last().unwrap_or("unknown error")
        )));
    }

    Ok(())
}

/// Run ffprobe and return stdout on success.
pub(crate) async fn run_ffprobe(args: &[String]) -> Result<String> {
    let output = Command::new("ffprobe")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Other(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Other(format!(
            "ffprobe failed: {}",
            stderr.lines().last().unwrap_or("unknown error")
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
