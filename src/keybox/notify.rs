//! Best-effort user notifications.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Notification tag, so repeated posts replace each other.
const NOTIFICATION_TAG: &str = "keyward_keybox";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to start notifier: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("notifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("notifier failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Deep link into the admin UI. Never carries the auth token.
    pub link: String,
}

impl Notification {
    /// Notification for `count` keyboxes disabled in one cycle.
    pub fn keyboxes_disabled(count: usize, port: u16) -> Self {
        Self {
            title: "Keyboxes revoked".to_string(),
            body: format!(
                "{} revoked keybox{} disabled.",
                count,
                if count == 1 { " was" } else { "es were" }
            ),
            link: format!("http://localhost:{}/?tab=keyboxes", port),
        }
    }
}

/// Where notifications go. Delivery may block; callers run it off the async
/// runtime and treat every error as non-fatal.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts through the platform `cmd notification` service.
pub struct CommandNotifier {
    program: PathBuf,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl NotificationSink for CommandNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = format!("{}\n{}", notification.body, notification.link);
        let mut child = Command::new(&self.program)
            .args(["notification", "post", "-S", "bigtext", "-t"])
            .arg(&notification.title)
            .arg(NOTIFICATION_TAG)
            .arg(&body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(NotifyError::Spawn)?;

        let Some(status) = child.wait_timeout(self.timeout).map_err(NotifyError::Spawn)? else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(NotifyError::Timeout(self.timeout));
        };

        if status.success() {
            tracing::info!(title = %notification.title, "notification posted");
            Ok(())
        } else {
            Err(NotifyError::Failed(status.to_string()))
        }
    }
}
