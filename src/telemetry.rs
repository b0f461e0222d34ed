//! Telemetry publisher (C7): writes a JSON status snapshot to disk for
//! out-of-process consumers (the `status` launcher subcommand, a future
//! companion app) to poll.
//!
//! Failures (disk full, permission denied, path gone) are logged at
//! debug and otherwise swallowed — telemetry is observability, not a
//! control path, and must never be allowed to wedge the main loop.

use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub bt_connected: bool,
    pub last_vocal_ts: f64,
    pub speech_confidence: f64,
    pub mouth_angle: i32,
    pub eyes_angle: i32,
    pub ts: f64,
}

/// Writes snapshots to a fixed path, truncating on every write (there is
/// no reader expected to tail it, only to poll the latest state).
pub struct TelemetryPublisher {
    path: String,
}

impl TelemetryPublisher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn publish(&self, snapshot: &StatusSnapshot) {
        if let Err(err) = self.try_publish(snapshot) {
            log::debug!("telemetry write to {} failed: {err}", self.path);
        }
    }

    fn try_publish(&self, snapshot: &StatusSnapshot) -> std::io::Result<()> {
        let path = Path::new(&self.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, snapshot)?;
        Ok(())
    }
}
