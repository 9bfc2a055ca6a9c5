//! Harness phases and the legal transitions between them

use serde::Serialize;
use std::fmt;

/// Lifecycle phase of a harness run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessState {
    Idle,
    Connecting,
    Subscribing,
    Publishing,
    Draining,
    Stopped,
    Failed,
}

impl HarnessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HarnessState::Stopped | HarnessState::Failed)
    }

    /// Pure transition table
    ///
    /// The forward path is Idle, Connecting, Subscribing, Publishing, Draining,
    /// Stopped. `Failed` is reachable from every non-terminal phase and `Stopped`
    /// from every phase except `Failed`. Re-entering `Stopped` is allowed so a
    /// repeated stop is not a violation.
    pub fn can_transition_to(&self, next: HarnessState) -> bool {
        use HarnessState::*;
        match (self, next) {
            (Idle, Connecting)
            | (Connecting, Subscribing)
            | (Subscribing, Publishing)
            | (Publishing, Draining) => true,
            (Failed, _) => false,
            (_, Stopped) => true,
            (Stopped, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HarnessState::Idle => "idle",
            HarnessState::Connecting => "connecting",
            HarnessState::Subscribing => "subscribing",
            HarnessState::Publishing => "publishing",
            HarnessState::Draining => "draining",
            HarnessState::Stopped => "stopped",
            HarnessState::Failed => "failed",
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
