//! Log domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line of step output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Zero-based line number within the step
    pub number: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
