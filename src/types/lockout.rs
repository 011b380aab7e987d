//! Persisted lockout record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single durable lockout flag. Present ⇒ LOCKED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub active: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl LockoutRecord {
    /// New active record stamped now
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            active: true,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
