//! Pending screenshot holder
//!
//! A `screenshot` command stores its capture here; the session takes it
//! when composing the next outgoing result.

use base64::prelude::{Engine, BASE64_STANDARD};
use parking_lot::Mutex;

/// A captured frame
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub name: String,
    pub png: Vec<u8>,
}

impl Screenshot {
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.png)
    }
}

/// Holds at most one capture awaiting attachment
#[derive(Debug, Default)]
pub struct ScreenshotStore {
    pending: Mutex<Option<Screenshot>>,
}

impl ScreenshotStore {
    /// Store a capture, replacing any unclaimed one
    pub fn put(&self, shot: Screenshot) {
        if let Some(previous) = self.pending.lock().replace(shot) {
            tracing::debug!(name = %previous.name, "Discarding unclaimed screenshot");
        }
    }

    pub fn take(&self) -> Option<Screenshot> {
        self.pending.lock().take()
    }

    pub fn clear(&self) {
        self.pending.lock().take();
    }
}

/// Timestamp-derived name for unnamed captures
pub fn default_name() -> String {
    format!("screenshot_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f"))
}
