//! Content notifications delivered to registered sinks.

use tracing::debug;

use crate::dispatch::{Dispatch, SendMode};

/// One notification subscription attached to a file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEntry {
    pub mode: SendMode,
    /// Fully qualified destination name.
    pub name: String,
    pub timeout_ms: u32,
    pub priority: i8,
}

/// Delivers `contents` to every sink in `entries`.
pub async fn send_all(dispatch: &mut dyn Dispatch, entries: &[NotifyEntry], contents: &[u8]) {
    for entry in entries {
        debug!(sink = %entry.name, bytes = contents.len(), "notify");
        dispatch
            .send_async(entry.mode, &entry.name, contents, entry.timeout_ms, entry.priority)
            .await;
    }
}
