//! SQLite database client for task and output bookkeeping.
//!
//! This module provides the connection pool wrapper and the operations on
//! sources, data products and tasks. Bundle and output operations are in
//! sibling modules as further `impl Database` blocks.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

use super::migrations::MigrationRunner;
use super::schema;
use crate::config::DatabaseConfig;
use crate::error::OutputError;
use crate::models::{
    Bundle, DataProduct, NewDataProduct, NewTask, Source, Status, Task, TaskFilter, TaskTimings,
};
use crate::outputs::OutputKind;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),

    /// An output row did not match its table.
    #[error("Invalid output: {0}")]
    Output(#[from] OutputError),

    /// A row referenced a status id outside the known hierarchy.
    #[error("Unknown status id: {0}")]
    InvalidStatus(i64),
}

/// Options for [`Database::create_tables`].
#[derive(Debug, Clone, Copy)]
pub struct CreateTablesOptions {
    /// Drop every existing table (and its data) first.
    pub drop_existing_tables: bool,
    /// Seed the `status` table with the status hierarchy.
    pub insert_status_rows: bool,
}

impl Default for CreateTablesOptions {
    fn default() -> Self {
        Self {
            drop_existing_tables: false,
            insert_status_rows: true,
        }
    }
}

/// Astra bookkeeping database client.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the database and returns a new client.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:///data/astra.db")
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        Self::connect_with(&DatabaseConfig::new(database_url)).await
    }

    /// Connects using pool settings from the configuration.
    ///
    /// In-memory databases exist per connection, so they are pinned to a
    /// single connection that is never recycled.
    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .require_url()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        let in_memory = is_in_memory(url);

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout());
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::debug!(in_memory, "Connected to database");
        Ok(Self { pool })
    }

    /// Creates a new database client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<usize, DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }

    /// Creates all tables for the Astra database.
    pub async fn create_tables(&self, options: CreateTablesOptions) -> Result<(), DatabaseError> {
        let tables = schema::all_tables();
        tracing::info!(count = tables.len(), tables = %tables.join(", "), "Creating tables");

        let runner = MigrationRunner::new(self.pool.clone());
        if options.drop_existing_tables {
            tracing::info!("Dropping existing tables");
            runner.reset_database().await?;
        }
        runner.run_migrations().await?;

        if options.insert_status_rows {
            self.insert_status_rows().await?;
        }
        Ok(())
    }

    /// Seeds the status hierarchy. Existing rows are left untouched.
    pub async fn insert_status_rows(&self) -> Result<(), DatabaseError> {
        tracing::info!("Inserting status rows");
        let mut tx = self.pool.begin().await?;
        for status in Status::ALL {
            sqlx::query("INSERT OR IGNORE INTO status (id, description) VALUES (?, ?)")
                .bind(status.id())
                .bind(status.description())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Returns the `(id, description)` rows of the status table.
    pub async fn statuses(&self) -> Result<Vec<(i64, String)>, DatabaseError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, description FROM status ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    // =========================================================================
    // Source Operations
    // =========================================================================

    /// Inserts a source, or fills in missing fields of an existing one.
    pub async fn upsert_source(&self, source: &Source) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO source (catalogid, sdssv_target0, sdssv_first_carton_name)
            VALUES (?, ?, ?)
            ON CONFLICT(catalogid) DO UPDATE SET
                sdssv_target0 = COALESCE(excluded.sdssv_target0, source.sdssv_target0),
                sdssv_first_carton_name = COALESCE(excluded.sdssv_first_carton_name, source.sdssv_first_carton_name)
            "#,
        )
        .bind(source.catalogid)
        .bind(source.sdssv_target0)
        .bind(&source.sdssv_first_carton_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_source(&self, catalogid: i64) -> Result<Option<Source>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM source WHERE catalogid = ?")
            .bind(catalogid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| source_from_row(&r)).transpose()
    }

    /// Links a source to a data product. Returns `false` if already linked.
    pub async fn link_source_data_product(
        &self,
        catalogid: i64,
        data_product_id: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sourcedataproduct (source_id, data_product_id) VALUES (?, ?)",
        )
        .bind(catalogid)
        .bind(data_product_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Data products that observe a source.
    pub async fn source_data_products(
        &self,
        catalogid: i64,
    ) -> Result<Vec<DataProduct>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT dataproduct.* FROM dataproduct
            JOIN sourcedataproduct ON sourcedataproduct.data_product_id = dataproduct.id
            WHERE sourcedataproduct.source_id = ?
            ORDER BY dataproduct.id
            "#,
        )
        .bind(catalogid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(data_product_from_row).collect()
    }

    /// Sources observed in a data product.
    pub async fn data_product_sources(
        &self,
        data_product_id: i64,
    ) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT source.* FROM source
            JOIN sourcedataproduct ON sourcedataproduct.source_id = source.catalogid
            WHERE sourcedataproduct.data_product_id = ?
            ORDER BY source.catalogid
            "#,
        )
        .bind(data_product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    // =========================================================================
    // Data Product Operations
    // =========================================================================

    /// Returns the data product with this release, filetype and kwargs,
    /// creating it if needed. The flag is `true` when a row was inserted.
    pub async fn get_or_create_data_product(
        &self,
        data_product: &NewDataProduct,
    ) -> Result<(DataProduct, bool), DatabaseError> {
        let kwargs = encode_json(&data_product.kwargs)?;
        let metadata = data_product.metadata.as_ref().map(encode_json).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO dataproduct (release, filetype, kwargs, metadata, size)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(release, filetype, kwargs) DO NOTHING
            "#,
        )
        .bind(&data_product.release)
        .bind(&data_product.filetype)
        .bind(&kwargs)
        .bind(&metadata)
        .bind(data_product.size)
        .execute(&self.pool)
        .await?;
        let created = result.rows_affected() == 1;

        let row = sqlx::query(
            "SELECT * FROM dataproduct WHERE release = ? AND filetype = ? AND kwargs = ?",
        )
        .bind(&data_product.release)
        .bind(&data_product.filetype)
        .bind(&kwargs)
        .fetch_one(&self.pool)
        .await?;

        Ok((data_product_from_row(&row)?, created))
    }

    pub async fn get_data_product(&self, id: i64) -> Result<Option<DataProduct>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM dataproduct WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| data_product_from_row(&r)).transpose()
    }

    /// Finds data products whose serialised keywords contain `needle`
    /// (case-insensitive), optionally restricted to one filetype.
    pub async fn search_data_products(
        &self,
        filetype: Option<&str>,
        needle: &str,
    ) -> Result<Vec<DataProduct>, DatabaseError> {
        let pattern = like_pattern(needle);
        let rows = match filetype {
            Some(filetype) => {
                sqlx::query(
                    r"SELECT * FROM dataproduct WHERE filetype = ? AND kwargs LIKE ? ESCAPE '\' ORDER BY id",
                )
                .bind(filetype)
                .bind(&pattern)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(r"SELECT * FROM dataproduct WHERE kwargs LIKE ? ESCAPE '\' ORDER BY id")
                    .bind(&pattern)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(data_product_from_row).collect()
    }

    /// Tasks that take this data product as input.
    pub async fn data_product_input_to_tasks(
        &self,
        data_product_id: i64,
    ) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT task.* FROM task
            JOIN taskinputdataproducts ON taskinputdataproducts.task_id = task.id
            WHERE taskinputdataproducts.data_product_id = ?
            ORDER BY task.id
            "#,
        )
        .bind(data_product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    /// Inserts a task in the `created` state.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, DatabaseError> {
        let parameters = task.parameters.as_ref().map(encode_json).transpose()?;

        let result = sqlx::query(
            "INSERT INTO task (name, parameters, version, created, status_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&task.name)
        .bind(&parameters)
        .bind(&task.version)
        .bind(Utc::now())
        .bind(Status::Created.id())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_task(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Task {}", id)))
    }

    /// Retrieves a task by its ID.
    ///
    /// Returns `None` if the task doesn't exist.
    pub async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM task WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Lists tasks matching the given filter, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, DatabaseError> {
        let mut query = String::from("SELECT * FROM task");
        let mut conditions = Vec::new();

        if filter.name.is_some() {
            conditions.push("name = ?");
        }
        if filter.status.is_some() {
            conditions.push("status_id = ?");
        }
        if filter.version.is_some() {
            conditions.push("version = ?");
        }

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY id");

        // SQLite requires a LIMIT before an OFFSET; -1 means no limit.
        if filter.limit.is_some() || filter.offset.is_some() {
            query.push_str(" LIMIT ?");
            if filter.offset.is_some() {
                query.push_str(" OFFSET ?");
            }
        }

        let mut sqlx_query = sqlx::query(&query);

        if let Some(ref name) = filter.name {
            sqlx_query = sqlx_query.bind(name);
        }
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status.id());
        }
        if let Some(ref version) = filter.version {
            sqlx_query = sqlx_query.bind(version);
        }
        if filter.limit.is_some() || filter.offset.is_some() {
            sqlx_query = sqlx_query.bind(filter.limit.unwrap_or(-1));
            if let Some(offset) = filter.offset {
                sqlx_query = sqlx_query.bind(offset);
            }
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Moves a task to a new status, stamping `completed` on completion.
    pub async fn update_task_status(&self, id: i64, status: Status) -> Result<(), DatabaseError> {
        let completed: Option<DateTime<Utc>> = (status == Status::Completed).then(Utc::now);

        let result = sqlx::query(
            "UPDATE task SET status_id = ?, completed = COALESCE(?, completed) WHERE id = ?",
        )
        .bind(status.id())
        .bind(completed)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Task {}", id)));
        }

        tracing::debug!(task_id = id, status = %status, "Updated task status");
        Ok(())
    }

    /// Stores the stage timings of a task.
    pub async fn record_task_timings(
        &self,
        id: i64,
        timings: &TaskTimings,
    ) -> Result<(), DatabaseError> {
        let assignments: Vec<String> = TaskTimings::COLUMNS
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect();
        let sql = format!("UPDATE task SET {} WHERE id = ?", assignments.join(", "));

        let mut query = sqlx::query(&sql);
        for value in timings.values() {
            query = query.bind(value);
        }
        let result = query.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Task {}", id)));
        }
        Ok(())
    }

    /// Records data products read by a task.
    pub async fn add_task_input_data_products(
        &self,
        task_id: i64,
        data_product_ids: &[i64],
    ) -> Result<usize, DatabaseError> {
        self.link_task_data_products(schema::tables::TASK_INPUT_DATA_PRODUCTS, task_id, data_product_ids)
            .await
    }

    /// Records data products written by a task.
    pub async fn add_task_output_data_products(
        &self,
        task_id: i64,
        data_product_ids: &[i64],
    ) -> Result<usize, DatabaseError> {
        self.link_task_data_products(schema::tables::TASK_OUTPUT_DATA_PRODUCTS, task_id, data_product_ids)
            .await
    }

    async fn link_task_data_products(
        &self,
        table: &str,
        task_id: i64,
        data_product_ids: &[i64],
    ) -> Result<usize, DatabaseError> {
        let sql = format!(
            "INSERT INTO {} (task_id, data_product_id) VALUES (?, ?)",
            table
        );

        let mut tx = self.pool.begin().await?;
        for data_product_id in data_product_ids {
            sqlx::query(&sql)
                .bind(task_id)
                .bind(data_product_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(data_product_ids.len())
    }

    pub async fn task_input_data_products(
        &self,
        task_id: i64,
    ) -> Result<Vec<DataProduct>, DatabaseError> {
        self.task_data_products(schema::tables::TASK_INPUT_DATA_PRODUCTS, task_id)
            .await
    }

    pub async fn task_output_data_products(
        &self,
        task_id: i64,
    ) -> Result<Vec<DataProduct>, DatabaseError> {
        self.task_data_products(schema::tables::TASK_OUTPUT_DATA_PRODUCTS, task_id)
            .await
    }

    async fn task_data_products(
        &self,
        table: &str,
        task_id: i64,
    ) -> Result<Vec<DataProduct>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT dataproduct.* FROM dataproduct
            JOIN {table} ON {table}.data_product_id = dataproduct.id
            WHERE {table}.task_id = ?
            ORDER BY {table}.id
            "#,
            table = table
        );

        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(data_product_from_row).collect()
    }

    /// Deletes a task together with its outputs and links.
    ///
    /// This operation is transactional - either everything is removed or nothing.
    pub async fn delete_task(&self, id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let output_ids: Vec<(i64,)> =
            sqlx::query_as("SELECT output_id FROM taskoutput WHERE task_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM taskoutput WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for kind in OutputKind::all() {
            sqlx::query(&format!("DELETE FROM {} WHERE task_id = ?", kind.table()))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for (output_id,) in &output_ids {
            sqlx::query("DELETE FROM output WHERE id = ?")
                .bind(output_id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM task WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Task {}", id)));
        }

        tx.commit().await?;
        tracing::debug!(task_id = id, outputs = output_ids.len(), "Deleted task");
        Ok(())
    }
}

// =========================================================================
// Row Mapping
// =========================================================================

/// Whether a SQLite URL names a per-connection in-memory database.
fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Escapes `LIKE` wildcards so `needle` matches literally under `ESCAPE '\'`.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Serialises a JSON column value.
pub(super) fn encode_json(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

fn decode_json(text: Option<String>) -> Result<Option<serde_json::Value>, serde_json::Error> {
    text.as_deref().map(serde_json::from_str).transpose()
}

fn status_from_id(id: i64) -> Result<Status, DatabaseError> {
    Status::from_id(id).ok_or(DatabaseError::InvalidStatus(id))
}

pub(super) fn source_from_row(row: &SqliteRow) -> Result<Source, DatabaseError> {
    Ok(Source {
        catalogid: row.try_get("catalogid")?,
        sdssv_target0: row.try_get("sdssv_target0")?,
        sdssv_first_carton_name: row.try_get("sdssv_first_carton_name")?,
    })
}

pub(super) fn data_product_from_row(row: &SqliteRow) -> Result<DataProduct, DatabaseError> {
    let kwargs: String = row.try_get("kwargs")?;
    Ok(DataProduct {
        id: row.try_get("id")?,
        release: row.try_get("release")?,
        filetype: row.try_get("filetype")?,
        kwargs: serde_json::from_str(&kwargs)?,
        metadata: decode_json(row.try_get("metadata")?)?,
        size: row.try_get("size")?,
    })
}

pub(super) fn task_from_row(row: &SqliteRow) -> Result<Task, DatabaseError> {
    let mut timings = [None; 10];
    for (slot, column) in timings.iter_mut().zip(TaskTimings::COLUMNS) {
        *slot = row.try_get(column)?;
    }

    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        parameters: decode_json(row.try_get("parameters")?)?,
        version: row.try_get("version")?,
        timings: TaskTimings::from_values(timings),
        created: row.try_get("created")?,
        completed: row.try_get("completed")?,
        status: status_from_id(row.try_get("status_id")?)?,
    })
}

pub(super) fn bundle_from_row(row: &SqliteRow) -> Result<Bundle, DatabaseError> {
    Ok(Bundle {
        id: row.try_get("id")?,
        status: status_from_id(row.try_get("status_id")?)?,
        meta: decode_json(row.try_get("meta")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_options_default() {
        let options = CreateTablesOptions::default();
        assert!(!options.drop_existing_tables);
        assert!(options.insert_status_rows);
    }

    #[test]
    fn test_encode_json_is_canonical() {
        let a = serde_json::json!({"obj": "2M0001", "apred": "dr17"});
        let b = serde_json::json!({"apred": "dr17", "obj": "2M0001"});
        assert_eq!(encode_json(&a).unwrap(), encode_json(&b).unwrap());
    }

    #[test]
    fn test_is_in_memory() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite:file:astra?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite:///data/astra.db"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("2M0848"), "%2M0848%");
        assert_eq!(like_pattern("M_7"), r"%M\_7%");
        assert_eq!(like_pattern(r"50%\"), r"%50\%\\%");
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::NotFound("Task 4".to_string());
        assert!(err.to_string().contains("Task 4"));

        let err = DatabaseError::InvalidStatus(42);
        assert!(err.to_string().contains("42"));
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let err = Database::connect_with(&DatabaseConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_in_memory_database_keeps_schema() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.create_tables(CreateTablesOptions::default()).await.unwrap();
        // A second call sees the same single connection and its tables.
        assert_eq!(db.run_migrations().await.unwrap(), 0);
        assert_eq!(db.statuses().await.unwrap().len(), 8);
    }
}
