//! Bundle operations: grouping tasks and counting their progress.

use super::database::{bundle_from_row, encode_json, task_from_row, Database, DatabaseError};
use crate::models::{Bundle, Status, Task};

impl Database {
    /// Creates an empty bundle in the `created` state.
    pub async fn create_bundle(
        &self,
        meta: Option<serde_json::Value>,
    ) -> Result<Bundle, DatabaseError> {
        let meta = meta.as_ref().map(encode_json).transpose()?;

        let result = sqlx::query("INSERT INTO bundle (status_id, meta) VALUES (?, ?)")
            .bind(Status::Created.id())
            .bind(&meta)
            .execute(self.pool())
            .await?;

        let id = result.last_insert_rowid();
        self.get_bundle(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Bundle {}", id)))
    }

    pub async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM bundle WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| bundle_from_row(&r)).transpose()
    }

    /// Adds tasks to a bundle. Returns the number of new memberships;
    /// tasks already in the bundle are skipped.
    pub async fn add_tasks_to_bundle(
        &self,
        bundle_id: i64,
        task_ids: &[i64],
    ) -> Result<usize, DatabaseError> {
        let mut added = 0;
        let mut tx = self.pool().begin().await?;
        for task_id in task_ids {
            let result =
                sqlx::query("INSERT OR IGNORE INTO taskbundle (task_id, bundle_id) VALUES (?, ?)")
                    .bind(task_id)
                    .bind(bundle_id)
                    .execute(&mut *tx)
                    .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;

        tracing::debug!(bundle_id, tasks = added, "Added tasks to bundle");
        Ok(added)
    }

    /// Tasks in a bundle, in creation order.
    pub async fn bundle_tasks(&self, bundle_id: i64) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT task.* FROM task
            JOIN taskbundle ON taskbundle.task_id = task.id
            WHERE taskbundle.bundle_id = ?
            ORDER BY task.id
            "#,
        )
        .bind(bundle_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Bundles that contain a task.
    pub async fn task_bundles(&self, task_id: i64) -> Result<Vec<Bundle>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT bundle.* FROM bundle
            JOIN taskbundle ON taskbundle.bundle_id = bundle.id
            WHERE taskbundle.task_id = ?
            ORDER BY bundle.id
            "#,
        )
        .bind(task_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(bundle_from_row).collect()
    }

    /// Number of tasks in a bundle.
    pub async fn count_tasks(&self, bundle_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(DISTINCT task.id) FROM task
            JOIN taskbundle ON taskbundle.task_id = task.id
            WHERE taskbundle.bundle_id = ?
            "#,
        )
        .bind(bundle_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Number of distinct tasks in a bundle that have written at least one output.
    pub async fn count_tasks_with_outputs(&self, bundle_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(DISTINCT taskoutput.task_id) FROM taskoutput
            WHERE taskoutput.task_id IN (
                SELECT taskbundle.task_id FROM taskbundle WHERE taskbundle.bundle_id = ?
            )
            "#,
        )
        .bind(bundle_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Number of input data product links across the bundle's tasks.
    pub async fn count_input_data_products(&self, bundle_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM taskinputdataproducts
            JOIN taskbundle ON taskbundle.task_id = taskinputdataproducts.task_id
            WHERE taskbundle.bundle_id = ?
            "#,
        )
        .bind(bundle_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Total size of the bundle's input data products.
    ///
    /// Returns `None` when the bundle has no inputs or none has a known size.
    pub async fn count_input_data_products_size(
        &self,
        bundle_id: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let (size,): (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT SUM(dataproduct.size) FROM dataproduct
            JOIN taskinputdataproducts ON taskinputdataproducts.data_product_id = dataproduct.id
            JOIN taskbundle ON taskbundle.task_id = taskinputdataproducts.task_id
            WHERE taskbundle.bundle_id = ?
            "#,
        )
        .bind(bundle_id)
        .fetch_one(self.pool())
        .await?;

        Ok(size)
    }

    pub async fn update_bundle_status(
        &self,
        bundle_id: i64,
        status: Status,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE bundle SET status_id = ? WHERE id = ?")
            .bind(status.id())
            .bind(bundle_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Bundle {}", bundle_id)));
        }

        tracing::debug!(bundle_id, status = %status, "Updated bundle status");
        Ok(())
    }

    /// Moves every task in a bundle to `status`. Returns the number of tasks updated.
    pub async fn update_bundle_task_statuses(
        &self,
        bundle_id: i64,
        status: Status,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE task SET status_id = ?
            WHERE id IN (SELECT task_id FROM taskbundle WHERE bundle_id = ?)
            "#,
        )
        .bind(status.id())
        .bind(bundle_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes a bundle and its memberships. The tasks themselves are kept.
    pub async fn delete_bundle(&self, bundle_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bundle WHERE id = ?")
            .bind(bundle_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Bundle {}", bundle_id)));
        }
        Ok(())
    }
}
