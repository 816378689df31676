//! Values and rows for pipeline output tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ColumnSpec, ColumnType, OutputKind};
use crate::error::OutputError;

/// Columns every output table carries that callers never set directly.
pub const RESERVED_COLUMNS: [&str; 3] = ["output_id", "task_id", "spectrum_pk"];

/// A single cell in an output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
}

impl OutputValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutputValue::Null => "null",
            OutputValue::Boolean(_) => "boolean",
            OutputValue::Integer(_) => "integer",
            OutputValue::Float(_) => "float",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OutputValue::Null)
    }

    /// Numeric value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Float(v) => Some(*v),
            OutputValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OutputValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OutputValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Literal form used in `DEFAULT` clauses.
    pub fn sql_literal(&self) -> String {
        match self {
            OutputValue::Null => "NULL".to_string(),
            OutputValue::Boolean(v) => (*v as i64).to_string(),
            OutputValue::Integer(v) => v.to_string(),
            OutputValue::Float(v) => format!("{:?}", v),
        }
    }

    /// Converts the value to the representation stored for `ty`.
    pub(crate) fn coerce(self, ty: ColumnType) -> Self {
        match (ty, self) {
            (ColumnType::Float, OutputValue::Integer(v)) => OutputValue::Float(v as f64),
            (_, value) => value,
        }
    }
}

impl From<f64> for OutputValue {
    fn from(v: f64) -> Self {
        OutputValue::Float(v)
    }
}

impl From<f32> for OutputValue {
    fn from(v: f32) -> Self {
        OutputValue::Float(v as f64)
    }
}

impl From<i64> for OutputValue {
    fn from(v: i64) -> Self {
        OutputValue::Integer(v)
    }
}

impl From<i32> for OutputValue {
    fn from(v: i32) -> Self {
        OutputValue::Integer(v as i64)
    }
}

impl From<bool> for OutputValue {
    fn from(v: bool) -> Self {
        OutputValue::Boolean(v)
    }
}

impl<T: Into<OutputValue>> From<Option<T>> for OutputValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(OutputValue::Null)
    }
}

/// A pipeline result waiting to be written to its output table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub kind: OutputKind,
    /// Optional key of the individual spectrum within the input product.
    pub spectrum_pk: Option<i64>,
    pub values: BTreeMap<String, OutputValue>,
}

impl OutputRecord {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            spectrum_pk: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_spectrum_pk(mut self, spectrum_pk: i64) -> Self {
        self.spectrum_pk = Some(spectrum_pk);
        self
    }

    /// Sets a column value, replacing any previous one.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<OutputValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<OutputValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&OutputValue> {
        self.values.get(column)
    }

    /// Checks the record against its table definition.
    pub fn validate(&self) -> Result<(), OutputError> {
        let table = self.kind.table();

        for (column, value) in &self.values {
            if RESERVED_COLUMNS.contains(&column.as_str()) {
                return Err(OutputError::ReservedColumn(column.clone()));
            }
            let spec = self
                .kind
                .column(column)
                .ok_or_else(|| OutputError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            if value.is_null() && !spec.nullable {
                return Err(OutputError::NullNotAllowed {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
            if !spec.ty.accepts(value) {
                return Err(OutputError::TypeMismatch {
                    table: table.to_string(),
                    column: column.clone(),
                    expected: spec.ty.name().to_string(),
                    found: value.type_name().to_string(),
                });
            }
        }

        if let Some(missing) = self
            .kind
            .columns()
            .iter()
            .find(|spec| spec.is_required() && !self.values.contains_key(&spec.name))
        {
            return Err(OutputError::MissingColumn {
                table: table.to_string(),
                column: missing.name.clone(),
            });
        }

        Ok(())
    }

    /// Validated `(column, value)` pairs in table order, ready to bind.
    pub(crate) fn bindings(&self) -> Result<Vec<(&'static ColumnSpec, OutputValue)>, OutputError> {
        self.validate()?;
        Ok(self
            .kind
            .columns()
            .iter()
            .filter_map(|spec| {
                self.values
                    .get(&spec.name)
                    .map(|value| (spec, value.clone().coerce(spec.ty)))
            })
            .collect())
    }
}

/// An output row read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredOutput {
    pub kind: OutputKind,
    pub output_id: i64,
    pub task_id: i64,
    pub spectrum_pk: Option<i64>,
    pub created: DateTime<Utc>,
    pub values: BTreeMap<String, OutputValue>,
}

impl StoredOutput {
    pub fn get(&self, column: &str) -> Option<&OutputValue> {
        self.values.get(column)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(OutputValue::as_f64)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(OutputValue::as_i64)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(OutputValue::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apogee_net_record() -> OutputRecord {
        let mut record = OutputRecord::new(OutputKind::ApogeeNet).with_spectrum_pk(7);
        for column in [
            "snr",
            "teff",
            "logg",
            "fe_h",
            "u_teff",
            "u_logg",
            "u_fe_h",
            "teff_sample_median",
            "logg_sample_median",
            "fe_h_sample_median",
        ] {
            record.insert(column, 1.0);
        }
        record
    }

    #[test]
    fn test_valid_record() {
        let record = apogee_net_record();
        assert!(record.validate().is_ok());
        assert_eq!(record.spectrum_pk, Some(7));
    }

    #[test]
    fn test_missing_required_column() {
        let mut record = apogee_net_record();
        record.values.remove("u_fe_h");
        assert_eq!(
            record.validate(),
            Err(OutputError::MissingColumn {
                table: "apogeenetoutput".to_string(),
                column: "u_fe_h".to_string(),
            })
        );
    }

    #[test]
    fn test_defaulted_column_is_optional() {
        let record = apogee_net_record();
        assert!(record.get("bitmask_flag").is_none());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_unknown_and_reserved_columns() {
        let record = apogee_net_record().set("vsini", 3.0);
        assert!(matches!(
            record.validate(),
            Err(OutputError::UnknownColumn { column, .. }) if column == "vsini"
        ));

        let record = apogee_net_record().set("task_id", 3i64);
        assert_eq!(
            record.validate(),
            Err(OutputError::ReservedColumn("task_id".to_string()))
        );
    }

    #[test]
    fn test_type_checks() {
        let record = apogee_net_record().set("teff", true);
        assert!(matches!(
            record.validate(),
            Err(OutputError::TypeMismatch { expected, found, .. })
                if expected == "float" && found == "boolean"
        ));

        let record = apogee_net_record().set("bitmask_flag", 1.5);
        assert!(record.validate().is_err());

        let record = apogee_net_record().set("teff", None::<f64>);
        assert!(matches!(
            record.validate(),
            Err(OutputError::NullNotAllowed { .. })
        ));
    }

    #[test]
    fn test_bindings_coerce_integers_to_float() {
        let record = apogee_net_record().set("teff", 5777i64).set("bitmask_flag", 4i64);
        let bindings = record.bindings().unwrap();
        let teff = bindings.iter().find(|(spec, _)| spec.name == "teff").unwrap();
        assert_eq!(teff.1, OutputValue::Float(5777.0));
        let flag = bindings
            .iter()
            .find(|(spec, _)| spec.name == "bitmask_flag")
            .unwrap();
        assert_eq!(flag.1, OutputValue::Integer(4));
        // Bindings follow table order, starting with snr.
        assert_eq!(bindings[0].0.name, "snr");
    }

    #[test]
    fn test_stored_output_accessors() {
        let mut values = BTreeMap::new();
        values.insert("teff".to_string(), OutputValue::Float(4500.0));
        values.insert("bitmask_flag".to_string(), OutputValue::Integer(2));
        values.insert("dithered".to_string(), OutputValue::Boolean(true));
        let stored = StoredOutput {
            kind: OutputKind::ApogeeNet,
            output_id: 1,
            task_id: 1,
            spectrum_pk: None,
            created: Utc::now(),
            values,
        };
        assert_eq!(stored.get_f64("teff"), Some(4500.0));
        assert_eq!(stored.get_f64("bitmask_flag"), Some(2.0));
        assert_eq!(stored.get_i64("teff"), None);
        assert_eq!(stored.get_bool("dithered"), Some(true));
        assert_eq!(stored.get("missing"), None);
    }
}
