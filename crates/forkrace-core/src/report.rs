//! Final run report

use crate::introspect::DescriptorInode;
use crate::retry::RunOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    RaceDetected,
    Exhausted,
    Cancelled,
    Failed,
}

/// Summary of a run, suitable for printing or serializing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceReport {
    pub verdict: Verdict,

    /// Attempts that ran
    pub attempts: u64,

    /// Inodes found in both the fork point and this process
    pub inodes: Vec<DescriptorInode>,

    /// Error message when the run failed
    pub error: Option<String>,
}

impl RaceReport {
    /// Process exit code for this report
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self.verdict {
            Verdict::RaceDetected => 0,
            _ => 1,
        }
    }

    /// One-line human readable verdict
    #[must_use]
    pub fn summary(&self) -> String {
        match self.verdict {
            Verdict::RaceDetected => format!(
                "*** inode race detected after {} attempts (inodes: {})",
                self.attempts,
                self.inodes
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Verdict::Exhausted => format!("no inode race after {} attempts", self.attempts),
            Verdict::Cancelled => format!("cancelled after {} attempts", self.attempts),
            Verdict::Failed => format!(
                "Error whilst attempting to reproduce the race: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

impl From<&RunOutcome> for RaceReport {
    fn from(outcome: &RunOutcome) -> Self {
        let attempts = outcome.attempts();
        match outcome {
            RunOutcome::RaceDetected { inodes, .. } => Self {
                verdict: Verdict::RaceDetected,
                attempts,
                inodes: inodes.iter().copied().collect(),
                error: None,
            },
            RunOutcome::Exhausted { .. } => Self {
                verdict: Verdict::Exhausted,
                attempts,
                inodes: Vec::new(),
                error: None,
            },
            RunOutcome::Cancelled { .. } => Self {
                verdict: Verdict::Cancelled,
                attempts,
                inodes: Vec::new(),
                error: None,
            },
            RunOutcome::Failed { error, .. } => Self {
                verdict: Verdict::Failed,
                attempts,
                inodes: Vec::new(),
                error: Some(error.to_string()),
            },
        }
    }
}
