//! Task rows, stage timings and list filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Status;

/// Version recorded on tasks that do not specify one.
pub const DEFAULT_TASK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A unit of analysis tracked in the `task` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub parameters: Option<serde_json::Value>,
    pub version: String,
    pub timings: TaskTimings,
    pub created: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub status: Status,
}

/// Fields required to insert a new task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub parameters: Option<serde_json::Value>,
    pub version: String,
}

impl NewTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: None,
            version: DEFAULT_TASK_VERSION.to_string(),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Wall-clock seconds spent in each execution stage.
///
/// Bundled execution shares setup work between tasks, so each stage is split
/// into time attributable to this task and its share of bundle overhead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTimings {
    pub time_total: Option<f64>,
    pub time_pre_execute: Option<f64>,
    pub time_execute: Option<f64>,
    pub time_post_execute: Option<f64>,
    pub time_pre_execute_task: Option<f64>,
    pub time_pre_execute_bundle_overhead: Option<f64>,
    pub time_execute_task: Option<f64>,
    pub time_execute_bundle_overhead: Option<f64>,
    pub time_post_execute_task: Option<f64>,
    pub time_post_execute_bundle_overhead: Option<f64>,
}

impl TaskTimings {
    /// Column names, in the order returned by [`TaskTimings::values`].
    pub const COLUMNS: [&'static str; 10] = [
        "time_total",
        "time_pre_execute",
        "time_execute",
        "time_post_execute",
        "time_pre_execute_task",
        "time_pre_execute_bundle_overhead",
        "time_execute_task",
        "time_execute_bundle_overhead",
        "time_post_execute_task",
        "time_post_execute_bundle_overhead",
    ];

    /// Timings for the three stages, with the total set to their sum.
    pub fn from_stages(pre_execute: f64, execute: f64, post_execute: f64) -> Self {
        Self {
            time_total: Some(pre_execute + execute + post_execute),
            time_pre_execute: Some(pre_execute),
            time_execute: Some(execute),
            time_post_execute: Some(post_execute),
            ..Self::default()
        }
    }

    /// Splits each stage into per-task time and bundle overhead.
    ///
    /// `task_seconds` holds the time measured for this task alone in the
    /// pre-execute, execute and post-execute stages; the remainder of each
    /// stage is recorded as overhead.
    pub fn with_task_share(mut self, task_seconds: [f64; 3]) -> Self {
        let stages = [
            self.time_pre_execute,
            self.time_execute,
            self.time_post_execute,
        ];
        let mut task = [None; 3];
        let mut overhead = [None; 3];
        for (i, stage) in stages.iter().enumerate() {
            task[i] = Some(task_seconds[i]);
            overhead[i] = stage.map(|total| (total - task_seconds[i]).max(0.0));
        }
        self.time_pre_execute_task = task[0];
        self.time_execute_task = task[1];
        self.time_post_execute_task = task[2];
        self.time_pre_execute_bundle_overhead = overhead[0];
        self.time_execute_bundle_overhead = overhead[1];
        self.time_post_execute_bundle_overhead = overhead[2];
        self
    }

    pub fn values(&self) -> [Option<f64>; 10] {
        [
            self.time_total,
            self.time_pre_execute,
            self.time_execute,
            self.time_post_execute,
            self.time_pre_execute_task,
            self.time_pre_execute_bundle_overhead,
            self.time_execute_task,
            self.time_execute_bundle_overhead,
            self.time_post_execute_task,
            self.time_post_execute_bundle_overhead,
        ]
    }

    pub(crate) fn from_values(v: [Option<f64>; 10]) -> Self {
        Self {
            time_total: v[0],
            time_pre_execute: v[1],
            time_execute: v[2],
            time_post_execute: v[3],
            time_pre_execute_task: v[4],
            time_pre_execute_bundle_overhead: v[5],
            time_execute_task: v[6],
            time_execute_bundle_overhead: v[7],
            time_post_execute_task: v[8],
            time_post_execute_bundle_overhead: v[9],
        }
    }
}

/// Filter criteria for listing tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    /// Filter by task name.
    pub name: Option<String>,
    /// Filter by status.
    pub status: Option<Status>,
    /// Filter by version.
    pub version: Option<String>,
    /// Maximum number of results.
    pub limit: Option<i64>,
    /// Offset for pagination.
    pub offset: Option<i64>,
}

impl TaskFilter {
    /// Creates a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the task name filter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the status filter.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the version filter.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset for pagination.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults_to_crate_version() {
        let task = NewTask::new("astra.contrib.ferre.Ferre");
        assert_eq!(task.version, DEFAULT_TASK_VERSION);
        assert!(task.parameters.is_none());

        let task = task
            .with_version("0.2.1")
            .with_parameters(serde_json::json!({"header_path": "grid.hdr"}));
        assert_eq!(task.version, "0.2.1");
        assert_eq!(task.parameters.unwrap()["header_path"], "grid.hdr");
    }

    #[test]
    fn test_timings_from_stages() {
        let timings = TaskTimings::from_stages(1.5, 10.0, 0.5);
        assert_eq!(timings.time_total, Some(12.0));
        assert_eq!(timings.time_execute, Some(10.0));
        assert!(timings.time_execute_task.is_none());
    }

    #[test]
    fn test_timings_task_share() {
        let timings = TaskTimings::from_stages(2.0, 10.0, 1.0).with_task_share([0.5, 4.0, 1.5]);
        assert_eq!(timings.time_pre_execute_task, Some(0.5));
        assert_eq!(timings.time_pre_execute_bundle_overhead, Some(1.5));
        assert_eq!(timings.time_execute_bundle_overhead, Some(6.0));
        // Task share larger than the stage clamps overhead at zero.
        assert_eq!(timings.time_post_execute_bundle_overhead, Some(0.0));
    }

    #[test]
    fn test_timings_values_round_trip() {
        let timings = TaskTimings::from_stages(1.0, 2.0, 3.0).with_task_share([1.0, 1.0, 1.0]);
        assert_eq!(TaskTimings::from_values(timings.values()), timings);
    }

    #[test]
    fn test_task_filter_builder() {
        let filter = TaskFilter::new()
            .with_name("classify")
            .with_status(Status::Running)
            .with_limit(10)
            .with_offset(20);

        assert_eq!(filter.name, Some("classify".to_string()));
        assert_eq!(filter.status, Some(Status::Running));
        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.offset, Some(20));
        assert!(filter.version.is_none());
    }
}
