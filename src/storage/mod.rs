//! SQLite persistent storage for tasks, bundles and pipeline outputs.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **Database**: SQLite client for sources, data products, tasks, bundles and outputs
//! - **Migrations**: Schema creation and bookkeeping
//! - **Schema**: Table definitions, including one table per output kind
//!
//! # Usage
//!
//! ```rust,ignore
//! use astra::models::{NewTask, Status};
//! use astra::storage::{CreateTablesOptions, Database};
//!
//! let db = Database::connect("sqlite:///data/astra.db").await?;
//! db.create_tables(CreateTablesOptions::default()).await?;
//!
//! let task = db.create_task(&NewTask::new("astra.contrib.ferre")).await?;
//! let bundle = db.create_bundle(None).await?;
//! db.add_tasks_to_bundle(bundle.id, &[task.id]).await?;
//! db.update_task_status(task.id, Status::Running).await?;
//!
//! let done = db.count_tasks_with_outputs(bundle.id).await?;
//! ```

pub mod bundles;
pub mod database;
pub mod migrations;
pub mod output_store;
pub mod schema;

pub use database::{CreateTablesOptions, Database, DatabaseError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
