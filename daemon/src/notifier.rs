//! Desktop notification sender

use notify_rust::Notification;
use tracing::debug;

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Best effort; headless hosts have no notification daemon.
    pub fn send(&self, summary: &str, body: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .appname("Aura")
            .show()
        {
            debug!("Desktop notification failed: {}", e);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
