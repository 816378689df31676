//! Row types for the Astra bookkeeping database.
//!
//! These are plain data carriers; all persistence lives in [`crate::storage`].

pub mod bundle;
pub mod data_product;
pub mod status;
pub mod task;

pub use bundle::Bundle;
pub use data_product::{DataProduct, NewDataProduct, Source, DEFAULT_RELEASE};
pub use status::Status;
pub use task::{NewTask, Task, TaskFilter, TaskTimings, DEFAULT_TASK_VERSION};
