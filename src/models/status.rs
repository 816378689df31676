//! Lifecycle states shared by tasks and bundles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution status of a task or bundle.
///
/// The discriminants are the primary keys of the seeded `status` table. Id 1
/// is the lowest level of the hierarchy and the default for new rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Created = 1,
    Locked = 2,
    Submitted = 3,
    Running = 4,
    Completed = 5,
    FailedPreExecution = 6,
    FailedExecution = 7,
    FailedPostExecution = 8,
}

impl Status {
    /// Every status in hierarchy order.
    pub const ALL: [Status; 8] = [
        Status::Created,
        Status::Locked,
        Status::Submitted,
        Status::Running,
        Status::Completed,
        Status::FailedPreExecution,
        Status::FailedExecution,
        Status::FailedPostExecution,
    ];

    /// Primary key of this status in the `status` table.
    pub fn id(&self) -> i64 {
        *self as i64
    }

    /// Description stored alongside the id.
    pub fn description(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Locked => "locked",
            Status::Submitted => "submitted",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::FailedPreExecution => "failed-pre-execution",
            Status::FailedExecution => "failed-execution",
            Status::FailedPostExecution => "failed-post-execution",
        }
    }

    /// Looks up a status by its table id.
    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// Whether this status records a failure in one of the execution stages.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::FailedPreExecution | Status::FailedExecution | Status::FailedPostExecution
        )
    }

    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        *self == Status::Completed || self.is_failure()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.description() == needle)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_is_lowest_level() {
        assert_eq!(Status::default(), Status::Created);
        assert_eq!(Status::Created.id(), 1);
        assert_eq!(Status::ALL[0], Status::Created);
    }

    #[test]
    fn test_ids_are_contiguous() {
        for (idx, status) in Status::ALL.iter().enumerate() {
            assert_eq!(status.id(), idx as i64 + 1);
            assert_eq!(Status::from_id(status.id()), Some(*status));
        }
        assert_eq!(Status::from_id(0), None);
        assert_eq!(Status::from_id(9), None);
    }

    #[test]
    fn test_parse_description() {
        assert_eq!("running".parse::<Status>(), Ok(Status::Running));
        assert_eq!(
            "failed_post_execution".parse::<Status>(),
            Ok(Status::FailedPostExecution)
        );
        assert!("finished".parse::<Status>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::FailedExecution.is_terminal());
        assert!(Status::FailedExecution.is_failure());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Completed.is_failure());
    }
}
