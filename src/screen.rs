//! Screenshot capture
//!
//! Shells out to whichever platform screenshot tool is installed and reads the
//! resulting image back from a temp file.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::{Error, Result};

/// A captured screenshot
#[derive(Debug, Clone)]
pub struct CapturedScreen {
    /// Encoded image bytes
    pub bytes: Vec<u8>,

    /// MIME type of `bytes`
    pub mime_type: String,

    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl CapturedScreen {
    /// Wrap encoded image bytes, sniffing the MIME type from the magic number
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = sniff_mime(&bytes).to_string();
        Self {
            bytes,
            mime_type,
            captured_at: Utc::now(),
        }
    }
}

/// Takes a screenshot on demand
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Capture the current screen
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no display or capture tool is available
    async fn capture(&self) -> Result<CapturedScreen>;
}

/// Captures the screen with the platform's command-line screenshot tool
#[derive(Debug, Clone, Copy)]
pub struct PlatformScreenCapturer {
    monitor_index: u32,
}

impl PlatformScreenCapturer {
    /// Create a capturer for a monitor (1-based; 0 lets the tool decide)
    #[must_use]
    pub const fn new(monitor_index: u32) -> Self {
        Self { monitor_index }
    }
}

impl Default for PlatformScreenCapturer {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ScreenCapturer for PlatformScreenCapturer {
    async fn capture(&self) -> Result<CapturedScreen> {
        let file = tempfile::Builder::new()
            .prefix("desktop-assistant-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| Error::Capture(format!("failed to create temp file: {e}")))?;
        let path = file.path().to_path_buf();

        let (program, args) = capture_command(self.monitor_index, &path)?;
        tracing::debug!(program, path = %path.display(), "capturing screenshot");

        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Capture(format!("{program} failed to start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Capture(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        read_capture(program, &path).await
    }
}

/// Read the image a screenshot tool wrote to `path`
async fn read_capture(program: &str, path: &Path) -> Result<CapturedScreen> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        Error::Capture(format!(
            "failed to read {program} output {}: {e}",
            path.display()
        ))
    })?;
    if bytes.is_empty() {
        return Err(Error::Capture(format!("{program} produced an empty image")));
    }

    tracing::debug!(bytes = bytes.len(), "screenshot captured");
    Ok(CapturedScreen::from_bytes(bytes))
}

/// Pick the screenshot command for this platform
fn capture_command(monitor_index: u32, path: &Path) -> Result<(&'static str, Vec<String>)> {
    let target = path.display().to_string();

    if cfg!(target_os = "macos") {
        let mut args = vec!["-x".to_string()];
        if monitor_index > 0 {
            args.push(format!("-D{monitor_index}"));
        }
        args.push(target);
        return Ok(("screencapture", args));
    }

    if cfg!(target_os = "linux") {
        let candidates: [(&'static str, &[&str]); 4] = [
            ("grim", &[]),
            ("gnome-screenshot", &["-f"]),
            ("scrot", &["-o"]),
            ("import", &["-window", "root"]),
        ];

        for (program, prefix) in candidates {
            if which::which(program).is_ok() {
                let mut args: Vec<String> = prefix.iter().map(ToString::to_string).collect();
                args.push(target);
                return Ok((program, args));
            }
        }

        return Err(Error::Capture(
            "no screenshot tool found (install grim, gnome-screenshot, scrot or imagemagick)"
                .to_string(),
        ));
    }

    Err(Error::Capture(format!(
        "screen capture not supported on {}",
        std::env::consts::OS
    )))
}

/// Detect the image type from its leading bytes
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}
