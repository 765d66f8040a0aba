//! Built-in context providers

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::{Map, Value, json};
use tokio::process::Command;

use super::ContextProvider;
use crate::{Error, Result};

/// Current time in UTC and local time
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampProvider;

#[async_trait]
impl ContextProvider for TimestampProvider {
    async fn produce(&self) -> Result<Value> {
        let now = Utc::now();
        Ok(json!({
            "iso_utc": now.to_rfc3339(),
            "epoch_seconds": now.timestamp(),
            "local": Local::now().format("%A %Y-%m-%d %H:%M").to_string(),
        }))
    }
}

/// Machine and process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentProvider;

#[async_trait]
impl ContextProvider for EnvironmentProvider {
    async fn produce(&self) -> Result<Value> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let cwd = std::env::current_dir()?.display().to_string();

        Ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "family": std::env::consts::FAMILY,
            "hostname": hostname,
            "username": username,
            "cwd": cwd,
            "app_version": env!("CARGO_PKG_VERSION"),
        }))
    }
}

/// Title and owning process of the focused window
#[derive(Debug, Clone, Copy)]
pub struct ActiveWindowProvider {
    /// Resolve the owning process name as well as the title
    pub include_process_name: bool,
}

impl Default for ActiveWindowProvider {
    fn default() -> Self {
        Self {
            include_process_name: true,
        }
    }
}

#[async_trait]
impl ContextProvider for ActiveWindowProvider {
    async fn produce(&self) -> Result<Value> {
        let (title, process_name) = if cfg!(target_os = "macos") {
            self.query_macos().await
        } else if cfg!(target_os = "linux") {
            self.query_linux().await?
        } else if cfg!(target_os = "windows") {
            self.query_windows().await?
        } else {
            return Err(Error::ContextProvider(format!(
                "active window lookup not supported on {}",
                std::env::consts::OS
            )));
        };

        let mut fact = Map::new();
        if let Some(title) = title {
            fact.insert("title".to_string(), Value::String(title));
        }
        if let Some(name) = process_name {
            fact.insert("process_name".to_string(), Value::String(name));
        }

        if fact.is_empty() {
            return Err(Error::ContextProvider("no active window reported".to_string()));
        }
        Ok(Value::Object(fact))
    }
}

impl ActiveWindowProvider {
    async fn query_linux(&self) -> Result<(Option<String>, Option<String>)> {
        if which::which("xdotool").is_err() {
            return Err(Error::ContextProvider("xdotool not found on PATH".to_string()));
        }

        let title = run_command("xdotool", &["getactivewindow", "getwindowname"]).await;
        let process_name = if self.include_process_name {
            match run_command("xdotool", &["getactivewindow", "getwindowpid"]).await {
                Some(pid) => Some(resolve_process_name(pid).await),
                None => None,
            }
        } else {
            None
        };

        Ok((title, process_name))
    }

    async fn query_windows(&self) -> Result<(Option<String>, Option<String>)> {
        if which::which("powershell").is_err() {
            return Err(Error::ContextProvider("powershell not found on PATH".to_string()));
        }

        let Some(output) = run_command(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", WINDOWS_FOREGROUND_SCRIPT],
        )
        .await
        else {
            return Ok((None, None));
        };

        let (pid, title) = parse_foreground_output(&output);
        let process_name = match pid {
            Some(pid) if self.include_process_name => Some(resolve_process_name(pid).await),
            _ => None,
        };

        Ok((title, process_name))
    }

    async fn query_macos(&self) -> (Option<String>, Option<String>) {
        let process_name = if self.include_process_name {
            run_command(
                "osascript",
                &[
                    "-e",
                    "tell application \"System Events\" to get name of first application process whose frontmost is true",
                ],
            )
            .await
        } else {
            None
        };
        let title = run_command(
            "osascript",
            &[
                "-e",
                "tell application \"System Events\" to tell (first process where frontmost is true) to get name of front window",
            ],
        )
        .await;

        (title, process_name)
    }
}

/// Prints `<pid>\t<title>` for the foreground window via user32
const WINDOWS_FOREGROUND_SCRIPT: &str = r#"
Add-Type @"
using System;
using System.Runtime.InteropServices;
using System.Text;
public static class Foreground {
    [DllImport("user32.dll")] public static extern IntPtr GetForegroundWindow();
    [DllImport("user32.dll")] public static extern int GetWindowTextLength(IntPtr hWnd);
    [DllImport("user32.dll", CharSet = CharSet.Unicode)] public static extern int GetWindowText(IntPtr hWnd, StringBuilder text, int count);
    [DllImport("user32.dll")] public static extern uint GetWindowThreadProcessId(IntPtr hWnd, out uint processId);
}
"@
$hwnd = [Foreground]::GetForegroundWindow()
if ($hwnd -eq [IntPtr]::Zero) { exit 1 }
$text = New-Object System.Text.StringBuilder ([Foreground]::GetWindowTextLength($hwnd) + 1)
[void][Foreground]::GetWindowText($hwnd, $text, $text.Capacity)
$procId = 0
[void][Foreground]::GetWindowThreadProcessId($hwnd, [ref]$procId)
Write-Output "$procId`t$($text.ToString().Trim())"
"#;

/// Split `<pid>\t<title>` into its parts, dropping empty or zero values
fn parse_foreground_output(output: &str) -> (Option<String>, Option<String>) {
    let (pid, title) = output.split_once('\t').unwrap_or((output, ""));
    let pid = pid.trim();
    let title = title.trim();

    (
        (!pid.is_empty() && pid != "0").then(|| pid.to_string()),
        (!title.is_empty()).then(|| title.to_string()),
    )
}

/// Run a command and return its trimmed stdout if it succeeded with output
async fn run_command(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).kill_on_drop(true).output().await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(program, error = %e, "command failed to start");
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(program, status = %output.status, "command exited with failure");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!stdout.is_empty()).then_some(stdout)
}

/// Map a pid string to a process name off the async runtime
async fn resolve_process_name(pid_text: String) -> String {
    let fallback = pid_text.clone();
    match tokio::task::spawn_blocking(move || lookup_process_name(&pid_text)).await {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!(error = %e, "process lookup task failed");
            fallback
        }
    }
}

/// Map a pid string to a process name, falling back to the pid text
fn lookup_process_name(pid_text: &str) -> String {
    let Ok(raw) = pid_text.parse::<u32>() else {
        return pid_text.to_string();
    };

    let pid = sysinfo::Pid::from_u32(raw);
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]));

    system
        .process(pid)
        .map_or_else(|| pid_text.to_string(), |p| p.name().to_string_lossy().into_owned())
}
