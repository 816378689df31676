use serde::{Deserialize, Serialize};

use super::Status;

/// A batch of tasks that are executed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: i64,
    pub status: Status,
    pub meta: Option<serde_json::Value>,
}
