use std::sync::Arc;

use epcyp_proto::config::NotifyConfig;
use tracing::info;

use crate::launcher;

/// Desktop notification sink for newly arrived favorite channels.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("notify: {} | {}", title, body);
    }
}

/// Runs an external command (e.g. `notify-send`) with title and body as its
/// two arguments.
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("notify: {} | {}", title, body);
        launcher::launch(&self.command, &[title.to_string(), body.to_string()]);
    }
}

pub fn from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    if config.command.trim().is_empty() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(CommandNotifier::new(config.command.trim()))
    }
}
