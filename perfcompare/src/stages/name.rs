//! The fixed, ordered set of pipeline stage names.

use crate::errors::PipelineValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one pipeline stage.
///
/// The variant order is the execution order of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Lay out the candidate config and binary symlinks.
    InstallCandidate,
    /// Download and link the reference binary (once per work root).
    InstallReference,
    /// Download and extract the benchmark datasets (once per work root).
    FetchDatasets,
    /// Seed the shared database and hard-link copy it for both instances.
    Configure,
    /// Start both instances and wait until they answer.
    StartServers,
    /// Run the benchmark definitions of this batch.
    RunTests,
    /// Render the comparison report.
    Report,
}

impl StageName {
    /// Every stage in execution order.
    pub const ALL: [Self; 7] = [
        Self::InstallCandidate,
        Self::InstallReference,
        Self::FetchDatasets,
        Self::Configure,
        Self::StartServers,
        Self::RunTests,
        Self::Report,
    ];

    /// Returns the textual name used on the command line and in reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InstallCandidate => "install-candidate",
            Self::InstallReference => "install-reference",
            Self::FetchDatasets => "fetch-datasets",
            Self::Configure => "configure",
            Self::StartServers => "start-servers",
            Self::RunTests => "run-tests",
            Self::Report => "report",
        }
    }

    /// Returns the zero-based position in [`StageName::ALL`].
    #[must_use]
    pub fn position(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = PipelineValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| PipelineValidationError::unknown_stage(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_name() {
        for stage in StageName::ALL {
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), stage);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_near_misses() {
        assert!("deploy".parse::<StageName>().is_err());
        assert!("run_tests".parse::<StageName>().is_err());
        assert!("Run-Tests".parse::<StageName>().is_err());
        assert!("".parse::<StageName>().is_err());
    }

    #[test]
    fn test_positions_follow_declaration_order() {
        assert_eq!(StageName::InstallCandidate.position(), 0);
        assert_eq!(StageName::RunTests.position(), 5);
        assert_eq!(StageName::Report.position(), 6);
        assert!(StageName::Configure < StageName::StartServers);
    }

    #[test]
    fn test_serialize_kebab_case() {
        let json = serde_json::to_string(&StageName::StartServers).unwrap();
        assert_eq!(json, r#""start-servers""#);
    }
}
