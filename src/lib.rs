//! astra: task bookkeeping and results persistence for spectroscopic
//! analysis pipelines.
//!
//! This library records which tasks ran on which data products, stores the
//! results each analysis method produces, and reports the progress of
//! bundles of tasks.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod outputs;
pub mod paths;
pub mod storage;

pub use config::{AstraConfig, ConfigError, DatabaseConfig};
pub use error::{OutputError, PathError};
pub use models::{
    Bundle, DataProduct, NewDataProduct, NewTask, Source, Status, Task, TaskFilter, TaskTimings,
};
pub use monitor::{BundleMonitor, BundleProgress, BundleWatcher, MonitorError};
pub use outputs::{OutputKind, OutputRecord, OutputValue, StoredOutput};
pub use paths::PathResolver;
pub use storage::{CreateTablesOptions, Database, DatabaseError};
