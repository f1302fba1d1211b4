use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Shown whenever a request fails and the user can simply try again.
pub const GENERIC_ERROR: &str = "There was an error with your request. Please retry.";
pub const SAVE_ERROR: &str = "There was an error saving your submission. Please retry.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub kind: AlertKind,
    pub text: String,
}

#[derive(Debug, Default)]
struct ViewFlags {
    show_genai_insights: bool,
    show_combined_dialog: bool,
}

/// Process-wide alert list and view flags, shared by every controller.
#[derive(Debug, Clone)]
pub struct UiStore {
    alerts: Arc<watch::Sender<Vec<Alert>>>,
    flags: Arc<Mutex<ViewFlags>>,
}

impl Default for UiStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UiStore {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(watch::Sender::new(Vec::new())),
            flags: Arc::new(Mutex::new(ViewFlags::default())),
        }
    }

    /// Append an alert; its id is one past the last alert's id.
    pub fn add_alert(&self, kind: AlertKind, text: impl Into<String>) -> u64 {
        let text = text.into();
        let mut id = 0;
        self.alerts.send_modify(|alerts| {
            id = alerts.last().map_or(0, |a| a.id + 1);
            alerts.push(Alert { id, kind, text });
        });
        id
    }

    pub fn remove_alert(&self, id: u64) {
        self.alerts.send_if_modified(|alerts| {
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            alerts.len() != before
        });
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.borrow().clone()
    }

    /// Notified on every alert change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Alert>> {
        self.alerts.subscribe()
    }

    pub fn show_genai_insights(&self) -> bool {
        self.flags.lock().map(|f| f.show_genai_insights).unwrap_or(false)
    }

    pub fn set_show_genai_insights(&self, show: bool) {
        if let Ok(mut f) = self.flags.lock() {
            f.show_genai_insights = show;
        }
    }

    pub fn show_combined_dialog(&self) -> bool {
        self.flags.lock().map(|f| f.show_combined_dialog).unwrap_or(false)
    }

    pub fn set_show_combined_dialog(&self, show: bool) {
        if let Ok(mut f) = self.flags.lock() {
            f.show_combined_dialog = show;
        }
    }
}
