//! Writing and reading pipeline outputs.
//!
//! A task's results may be spread over several pipeline tables. Retrieval
//! walks every [`OutputKind`] table for the task and merges the rows by
//! output id.

use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

use super::database::{Database, DatabaseError};
use crate::outputs::{ColumnType, OutputKind, OutputRecord, OutputValue, StoredOutput};

impl Database {
    /// Stores one result row for a task and returns its output id.
    ///
    /// The `output` row, the `taskoutput` link and the pipeline row are
    /// written in one transaction.
    pub async fn create_output(
        &self,
        task_id: i64,
        record: &OutputRecord,
    ) -> Result<i64, DatabaseError> {
        let bindings = record.bindings()?;

        let mut columns = vec!["output_id", "task_id", "spectrum_pk"];
        columns.extend(bindings.iter().map(|(spec, _)| spec.name.as_str()));
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            record.kind.table(),
            columns.join(", "),
            placeholders
        );

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("INSERT INTO output (created) VALUES (?)")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        let output_id = result.last_insert_rowid();

        sqlx::query("INSERT INTO taskoutput (task_id, output_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(output_id)
            .execute(&mut *tx)
            .await?;

        let mut query = sqlx::query(&sql)
            .bind(output_id)
            .bind(task_id)
            .bind(record.spectrum_pk);
        for (_, value) in bindings {
            query = bind_value(query, value);
        }
        query.execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::debug!(task_id, output_id, kind = %record.kind, "Created output");
        Ok(output_id)
    }

    /// Number of outputs a task has written.
    pub async fn count_outputs(&self, task_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM taskoutput WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    /// Every output of a task across all pipeline tables, ordered by output id.
    pub async fn task_outputs(&self, task_id: i64) -> Result<Vec<StoredOutput>, DatabaseError> {
        if self.count_outputs(task_id).await? == 0 {
            return Ok(Vec::new());
        }

        let mut outputs = Vec::new();
        for kind in OutputKind::all() {
            outputs.extend(self.task_outputs_of_kind(task_id, *kind).await?);
        }
        outputs.sort_by_key(|o| o.output_id);
        Ok(outputs)
    }

    /// Outputs of a task in a single pipeline table, ordered by output id.
    pub async fn task_outputs_of_kind(
        &self,
        task_id: i64,
        kind: OutputKind,
    ) -> Result<Vec<StoredOutput>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {table}.*, output.created AS created FROM {table}
            JOIN output ON output.id = {table}.output_id
            WHERE {table}.task_id = ?
            ORDER BY {table}.output_id
            "#,
            table = kind.table()
        );

        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(|row| output_from_row(kind, row)).collect()
    }

    /// Retrieves one output row by kind and output id.
    pub async fn get_output(
        &self,
        kind: OutputKind,
        output_id: i64,
    ) -> Result<Option<StoredOutput>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {table}.*, output.created AS created FROM {table}
            JOIN output ON output.id = {table}.output_id
            WHERE {table}.output_id = ?
            "#,
            table = kind.table()
        );

        let row = sqlx::query(&sql)
            .bind(output_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| output_from_row(kind, &r)).transpose()
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: OutputValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        OutputValue::Null => query.bind(Option::<f64>::None),
        OutputValue::Boolean(v) => query.bind(v),
        OutputValue::Integer(v) => query.bind(v),
        OutputValue::Float(v) => query.bind(v),
    }
}

fn output_from_row(kind: OutputKind, row: &SqliteRow) -> Result<StoredOutput, DatabaseError> {
    let mut values = BTreeMap::new();
    for spec in kind.columns() {
        let name = spec.name.as_str();
        let value = match spec.ty {
            ColumnType::Float => row.try_get::<Option<f64>, _>(name)?.map(OutputValue::Float),
            ColumnType::Integer | ColumnType::BigInteger => {
                row.try_get::<Option<i64>, _>(name)?.map(OutputValue::Integer)
            }
            ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(OutputValue::Boolean),
        };
        values.insert(spec.name.clone(), value.unwrap_or(OutputValue::Null));
    }

    Ok(StoredOutput {
        kind,
        output_id: row.try_get("output_id")?,
        task_id: row.try_get("task_id")?,
        spectrum_pk: row.try_get("spectrum_pk")?,
        created: row.try_get("created")?,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use crate::storage::CreateTablesOptions;

    async fn setup() -> Database {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.create_tables(CreateTablesOptions::default()).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_invalid_record_writes_nothing() {
        let db = setup().await;
        let task = db.create_task(&NewTask::new("ferre")).await.unwrap();

        let record = OutputRecord::new(OutputKind::Ferre).set("not_a_column", 1.0);
        let err = db.create_output(task.id, &record).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Output(_)));
        assert_eq!(db.count_outputs(task.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_rolls_back() {
        let db = setup().await;
        let record = OutputRecord::new(OutputKind::ClassifySource).set("lp_yso", -1.2);
        let err = db.create_output(999, &record).await.unwrap_err();
        assert!(matches!(err, DatabaseError::QueryFailed(_)));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM output")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_defaults_and_nulls_read_back() {
        let db = setup().await;
        let task = db.create_task(&NewTask::new("classify")).await.unwrap();

        let record = OutputRecord::new(OutputKind::ClassifySource).set("lp_yso", -0.5);
        let output_id = db.create_output(task.id, &record).await.unwrap();

        let stored = db
            .get_output(OutputKind::ClassifySource, output_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.task_id, task.id);
        assert_eq!(stored.spectrum_pk, None);
        assert_eq!(stored.get_f64("lp_yso"), Some(-0.5));
        assert_eq!(stored.values.len(), OutputKind::ClassifySource.columns().len());

        assert!(db
            .get_output(OutputKind::Ferre, output_id)
            .await
            .unwrap()
            .is_none());
    }
}
