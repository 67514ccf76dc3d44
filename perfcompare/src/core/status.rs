//! Stage status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a recorded stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every step completed successfully.
    Ok,
    /// The stage was satisfied by an existing sentinel marker and did not run.
    Skip,
    /// A step failed; the remaining steps did not run.
    Fail,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skip => write!(f, "skip"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skip)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Ok.to_string(), "ok");
        assert_eq!(StageStatus::Skip.to_string(), "skip");
        assert_eq!(StageStatus::Fail.to_string(), "fail");
    }

    #[test]
    fn test_skip_counts_as_success() {
        assert!(StageStatus::Skip.is_success());
        assert!(!StageStatus::Skip.is_failure());
        assert!(StageStatus::Fail.is_failure());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Fail).unwrap();
        assert_eq!(json, r#""fail""#);
    }
}
