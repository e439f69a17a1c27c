//! Exit status codes for the CLI
//!
//! A clean run exits with the number of failed requests, capped at
//! [`MAX_FAILURES_EXIT`] so the count never collides with the dedicated
//! error codes:
//! - 0: every request in every plan passed
//! - 1-250: number of failed requests
//! - 251: no plan file provided or found
//! - 252: invalid plan (parse errors, malformed variable files, bad
//!   `--variable` definitions)
//! - 253: user interrupted (Ctrl+C)
//! - 254: unexpected internal error

use std::process::{ExitCode, Termination};

/// Largest failed-request count representable in the exit code.
pub const MAX_FAILURES_EXIT: usize = 250;

/// Exit status of a reqplan invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Run completed; carries the capped number of failed requests.
    Completed(u8),
    /// No plan file provided or found.
    NoPlan,
    /// Parsing or validating a plan failed.
    InvalidPlan,
    /// User interrupted (Ctrl+C).
    Interrupted,
    /// Unexpected internal error.
    Unexpected,
}

impl ExitStatus {
    /// Exit status for a completed run with the given failed-request count.
    pub fn from_failed_count(failed: usize) -> Self {
        ExitStatus::Completed(failed.min(MAX_FAILURES_EXIT) as u8)
    }

    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Completed(failed) => failed,
            ExitStatus::NoPlan => 251,
            ExitStatus::InvalidPlan => 252,
            ExitStatus::Interrupted => 253,
            ExitStatus::Unexpected => 254,
        }
    }

    pub fn is_clean(self) -> bool {
        matches!(self, ExitStatus::Completed(0))
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_count_caps_at_250() {
        assert_eq!(ExitStatus::from_failed_count(0).code(), 0);
        assert_eq!(ExitStatus::from_failed_count(7).code(), 7);
        assert_eq!(ExitStatus::from_failed_count(250).code(), 250);
        assert_eq!(ExitStatus::from_failed_count(3000).code(), 250);
    }

    #[test]
    fn test_dedicated_codes_above_cap() {
        assert_eq!(ExitStatus::NoPlan.code(), 251);
        assert_eq!(ExitStatus::InvalidPlan.code(), 252);
        assert_eq!(ExitStatus::Interrupted.code(), 253);
        assert_eq!(ExitStatus::Unexpected.code(), 254);
    }

    #[test]
    fn test_is_clean() {
        assert!(ExitStatus::from_failed_count(0).is_clean());
        assert!(!ExitStatus::from_failed_count(1).is_clean());
        assert!(!ExitStatus::InvalidPlan.is_clean());
    }
}
