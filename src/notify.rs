//! Desktop notifications for update results.

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Surfaces short, passive messages to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str);
}

/// Sends notifications through `notify-send`.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::with_program("notify-send")
    }
}

impl DesktopNotifier {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    /// Does not block on the notification daemon. Inside a runtime the
    /// child is awaited on a task so it is reaped once it exits.
    fn notify(&self, summary: &str, body: &str) {
        let mut command = Command::new(&self.program);
        command
            .args([
                "-a",
                "Bing Daily Wallpaper",
                "-i",
                "preferences-desktop-wallpaper",
                summary,
                body,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let summary = summary.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = command.status().await {
                        debug!(error = %e, summary, "notify-send unavailable");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = command.as_std_mut().status() {
                    debug!(error = %e, summary, "notify-send unavailable");
                }
            }
        }
    }
}
