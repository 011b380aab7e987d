//! Constitutional gate state definitions

use serde::{Deserialize, Serialize};

use crate::types::LockoutRecord;

/// The three states of the constitutional gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    /// Health within tolerance, clearance issued normally
    Open,
    /// Health below crystallization threshold, soft redaction only
    Degraded,
    /// Lockout record present, terminal until operator reset
    Locked,
}

impl GateState {
    /// Get ANSI color code for terminal display
    pub fn color_code(&self) -> &'static str {
        match self {
            GateState::Open => "\x1b[32m",     // Green
            GateState::Degraded => "\x1b[33m", // Yellow
            GateState::Locked => "\x1b[31m",   // Red
        }
    }

    /// Reset ANSI color
    pub fn color_reset() -> &'static str {
        "\x1b[0m"
    }

    /// Get emoji for state
    pub fn emoji(&self) -> &'static str {
        match self {
            GateState::Open => "🟢",
            GateState::Degraded => "🔶",
            GateState::Locked => "🔒",
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateState::Open => "OPEN",
            GateState::Degraded => "DEGRADED",
            GateState::Locked => "LOCKED",
        };
        write!(f, "{}", name)
    }
}

/// Point-in-time view of the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStatus {
    pub state: GateState,
    pub health_index: f64,
    /// Dispersion behind the current health index, if any was measured
    pub last_dispersion: Option<f64>,
    pub tokens_issued: u64,
    pub lockout: Option<LockoutRecord>,
}

impl GateStatus {
    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let mut line = format!(
            "{}{} state={} | health={:.4} | tokens={}{}",
            self.state.color_code(),
            self.state.emoji(),
            self.state,
            self.health_index,
            self.tokens_issued,
            GateState::color_reset()
        );
        if let Some(record) = &self.lockout {
            line.push_str(&format!(
                "\n  lockout: {} (since {})",
                record.reason,
                record.timestamp.to_rfc3339()
            ));
        }
        line
    }
}
