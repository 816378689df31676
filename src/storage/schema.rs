//! Database schema definitions.
//!
//! Table and foreign-key column names match the layout produced by earlier
//! Astra releases so that existing databases remain readable.

use crate::outputs::OutputKind;

/// SQL schema for creating the source table.
pub const CREATE_SOURCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS source (
    catalogid BIGINT PRIMARY KEY,
    sdssv_target0 BIGINT,
    sdssv_first_carton_name TEXT
)
"#;

/// SQL schema for creating the data product table.
pub const CREATE_DATA_PRODUCT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dataproduct (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    release TEXT NOT NULL DEFAULT 'sdss5',
    filetype TEXT NOT NULL,
    kwargs TEXT NOT NULL,
    metadata TEXT,
    size INTEGER,
    UNIQUE(release, filetype, kwargs)
)
"#;

/// SQL schema for the many-to-many link between sources and data products.
pub const CREATE_SOURCE_DATA_PRODUCT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sourcedataproduct (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id BIGINT NOT NULL REFERENCES source(catalogid),
    data_product_id INTEGER NOT NULL REFERENCES dataproduct(id),
    UNIQUE(source_id, data_product_id)
)
"#;

/// SQL schema for the shared output id space.
pub const CREATE_OUTPUT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS output (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TIMESTAMP NOT NULL
)
"#;

/// SQL schema for creating the status table.
pub const CREATE_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS status (
    id INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    UNIQUE(id, description)
)
"#;

/// SQL schema for creating the task table.
pub const CREATE_TASK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    parameters TEXT,
    version TEXT NOT NULL,
    time_total REAL,
    time_pre_execute REAL,
    time_execute REAL,
    time_post_execute REAL,
    time_pre_execute_task REAL,
    time_pre_execute_bundle_overhead REAL,
    time_execute_task REAL,
    time_execute_bundle_overhead REAL,
    time_post_execute_task REAL,
    time_post_execute_bundle_overhead REAL,
    created TIMESTAMP NOT NULL,
    completed TIMESTAMP,
    status_id INTEGER NOT NULL DEFAULT 1 REFERENCES status(id)
)
"#;

/// SQL schema linking tasks to the outputs they produced.
pub const CREATE_TASK_OUTPUT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS taskoutput (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id),
    output_id INTEGER NOT NULL REFERENCES output(id)
)
"#;

/// SQL schema for creating the bundle table.
pub const CREATE_BUNDLE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bundle (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status_id INTEGER NOT NULL DEFAULT 1 REFERENCES status(id),
    meta TEXT
)
"#;

/// SQL schema for bundle membership.
pub const CREATE_TASK_BUNDLE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS taskbundle (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
    bundle_id INTEGER NOT NULL REFERENCES bundle(id) ON DELETE CASCADE,
    UNIQUE(task_id, bundle_id)
)
"#;

/// SQL schema for the data products a task reads.
pub const CREATE_TASK_INPUT_DATA_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS taskinputdataproducts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
    data_product_id INTEGER NOT NULL REFERENCES dataproduct(id) ON DELETE CASCADE
)
"#;

/// SQL schema for the data products a task writes.
pub const CREATE_TASK_OUTPUT_DATA_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS taskoutputdataproducts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
    data_product_id INTEGER NOT NULL REFERENCES dataproduct(id) ON DELETE CASCADE
)
"#;

/// SQL for creating the indexes on link tables.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sourcedataproduct_data_product_id ON sourcedataproduct(data_product_id);
CREATE INDEX IF NOT EXISTS idx_task_status_id ON task(status_id);
CREATE INDEX IF NOT EXISTS idx_taskoutput_task_id ON taskoutput(task_id);
CREATE INDEX IF NOT EXISTS idx_taskoutput_output_id ON taskoutput(output_id);
CREATE INDEX IF NOT EXISTS idx_taskbundle_task_id ON taskbundle(task_id);
CREATE INDEX IF NOT EXISTS idx_taskbundle_bundle_id ON taskbundle(bundle_id);
CREATE INDEX IF NOT EXISTS idx_taskinputdataproducts_task_id ON taskinputdataproducts(task_id);
CREATE INDEX IF NOT EXISTS idx_taskinputdataproducts_data_product_id ON taskinputdataproducts(data_product_id);
CREATE INDEX IF NOT EXISTS idx_taskoutputdataproducts_task_id ON taskoutputdataproducts(task_id)
"#;

/// Builds the `CREATE TABLE` statement for a pipeline output table.
pub fn create_output_table(kind: OutputKind) -> String {
    let mut clauses = vec![
        "output_id INTEGER PRIMARY KEY REFERENCES output(id) ON DELETE CASCADE".to_string(),
        "task_id INTEGER NOT NULL REFERENCES task(id)".to_string(),
        "spectrum_pk BIGINT".to_string(),
    ];
    clauses.extend(kind.columns().iter().map(|c| c.ddl()));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        kind.table(),
        clauses.join(",\n    ")
    )
}

/// Builds the task lookup index for a pipeline output table.
pub fn create_output_table_index(kind: OutputKind) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_task_id ON {table}(task_id)",
        table = kind.table()
    )
}

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<String> {
    let mut statements: Vec<String> = [
        CREATE_SOURCE_TABLE,
        CREATE_DATA_PRODUCT_TABLE,
        CREATE_SOURCE_DATA_PRODUCT_TABLE,
        CREATE_OUTPUT_TABLE,
        CREATE_STATUS_TABLE,
        CREATE_TASK_TABLE,
        CREATE_TASK_OUTPUT_TABLE,
        CREATE_BUNDLE_TABLE,
        CREATE_TASK_BUNDLE_TABLE,
        CREATE_TASK_INPUT_DATA_PRODUCTS_TABLE,
        CREATE_TASK_OUTPUT_DATA_PRODUCTS_TABLE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for kind in OutputKind::all() {
        statements.push(create_output_table(*kind));
    }

    statements.push(CREATE_INDEXES.to_string());
    for kind in OutputKind::all() {
        statements.push(create_output_table_index(*kind));
    }

    statements
}

/// Table names in the schema.
pub mod tables {
    pub const SOURCE: &str = "source";
    pub const DATA_PRODUCT: &str = "dataproduct";
    pub const SOURCE_DATA_PRODUCT: &str = "sourcedataproduct";
    pub const OUTPUT: &str = "output";
    pub const STATUS: &str = "status";
    pub const TASK: &str = "task";
    pub const TASK_OUTPUT: &str = "taskoutput";
    pub const BUNDLE: &str = "bundle";
    pub const TASK_BUNDLE: &str = "taskbundle";
    pub const TASK_INPUT_DATA_PRODUCTS: &str = "taskinputdataproducts";
    pub const TASK_OUTPUT_DATA_PRODUCTS: &str = "taskoutputdataproducts";
    /// Migration bookkeeping table.
    pub const MIGRATIONS: &str = "_migrations";
}

/// Every table in creation order, pipeline output tables last.
pub fn all_tables() -> Vec<&'static str> {
    let mut names = vec![
        tables::SOURCE,
        tables::DATA_PRODUCT,
        tables::SOURCE_DATA_PRODUCT,
        tables::OUTPUT,
        tables::STATUS,
        tables::TASK,
        tables::TASK_OUTPUT,
        tables::BUNDLE,
        tables::TASK_BUNDLE,
        tables::TASK_INPUT_DATA_PRODUCTS,
        tables::TASK_OUTPUT_DATA_PRODUCTS,
    ];
    names.extend(OutputKind::all().iter().map(|k| k.table()));
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 11 + 2 * OutputKind::ALL.len() + 1);
        // Source must come first (the link table references it)
        assert!(statements[0].contains("source"));
        // Core tables precede every output table
        let task_idx = statements
            .iter()
            .position(|s| s.contains("CREATE TABLE IF NOT EXISTS task ("))
            .unwrap();
        let ferre_idx = statements
            .iter()
            .position(|s| s.contains("ferreoutput ("))
            .unwrap();
        assert!(task_idx < ferre_idx);
        // Indexes should be last
        assert!(statements.last().unwrap().contains("CREATE INDEX"));
    }

    #[test]
    fn test_output_table_ddl() {
        let ddl = create_output_table(OutputKind::ApogeeNet);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS apogeenetoutput ("));
        assert!(ddl.contains("output_id INTEGER PRIMARY KEY REFERENCES output(id) ON DELETE CASCADE"));
        assert!(ddl.contains("task_id INTEGER NOT NULL REFERENCES task(id)"));
        assert!(ddl.contains("bitmask_flag INTEGER NOT NULL DEFAULT 0"));
        assert!(ddl.trim_end().ends_with(')'));
    }

    #[test]
    fn test_all_tables_matches_creation_order() {
        let tables = all_tables();
        assert_eq!(tables.len(), 11 + OutputKind::ALL.len());
        assert_eq!(tables[0], tables::SOURCE);
        assert_eq!(tables.last().copied(), Some("thecannonoutput"));
    }
}
