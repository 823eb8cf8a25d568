//! Core types for output capture

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an output pump's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpStatus {
    pub bytes_captured: u64,
    pub chunks: u64,
    /// Read errors seen before end-of-stream, in order.
    pub read_errors: Vec<String>,
    /// Transcript sink failures, in order.
    pub sink_errors: Vec<String>,
    /// Every output stream reached end-of-stream.
    pub reached_eof: bool,
    /// The pump was cancelled before end-of-stream.
    pub cancelled: bool,
    pub last_activity: Option<DateTime<Utc>>,
}
