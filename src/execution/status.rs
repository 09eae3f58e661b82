use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a step execution (manager or partition)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Recorded, no work started yet
    Starting,
    /// Work in progress
    Executing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Interrupted before finishing
    Stopped,
}

impl BatchStatus {
    /// Whether no further transition is allowed from this status
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Whether a record in this status may be moved to `next`.
    ///
    /// Terminal statuses never move again; a restart creates a new record.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        match self {
            Self::Starting => next != Self::Starting,
            Self::Executing => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Stopped => false,
        }
    }

    /// Canonical upper-case name as stored by the persistent backends
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "EXECUTING" => Ok(Self::Executing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}
