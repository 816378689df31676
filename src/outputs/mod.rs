//! Polymorphic pipeline outputs.
//!
//! Every analysis method writes its results into its own table. All of those
//! tables share the `output` id space: a result is one row in `output`, one
//! row linking it to its task in `taskoutput`, and one row in the
//! pipeline-specific table keyed by that same output id.
//!
//! # Usage
//!
//! ```rust,ignore
//! use astra::outputs::{OutputKind, OutputRecord};
//!
//! let record = OutputRecord::new(OutputKind::Ferre)
//!     .with_spectrum_pk(3)
//!     .set("snr", 112.4)
//!     .set("teff", 4810.0)
//!     .set("logg", 2.61)
//!     .set("metals", -0.32);
//!
//! let output_id = db.create_output(task.id, &record).await?;
//! let outputs = db.task_outputs(task.id).await?;
//! ```

pub mod columns;
pub mod record;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub use columns::{
    cannon_correlation_columns, ColumnSpec, ColumnType, ASPCAP_ELEMENTS, ASPCAP_PARAMETERS,
    CANNON_LABELS, SMALL,
};
pub use record::{OutputRecord, OutputValue, StoredOutput, RESERVED_COLUMNS};

use crate::error::OutputError;

/// The analysis method that produced an output, one per results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Classifier,
    ClassifySource,
    Ferre,
    ApogeeNet,
    Aspcap,
    TheCannon,
}

impl OutputKind {
    /// All kinds, in table creation order.
    pub const ALL: [OutputKind; 6] = [
        OutputKind::Classifier,
        OutputKind::ClassifySource,
        OutputKind::Ferre,
        OutputKind::ApogeeNet,
        OutputKind::Aspcap,
        OutputKind::TheCannon,
    ];

    pub fn all() -> &'static [OutputKind] {
        &Self::ALL
    }

    /// Name of the results table.
    pub fn table(&self) -> &'static str {
        match self {
            OutputKind::Classifier => "classifieroutput",
            OutputKind::ClassifySource => "classifysourceoutput",
            OutputKind::Ferre => "ferreoutput",
            OutputKind::ApogeeNet => "apogeenetoutput",
            OutputKind::Aspcap => "aspcapoutput",
            OutputKind::TheCannon => "thecannonoutput",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputKind::Classifier => "classifier",
            OutputKind::ClassifySource => "classify_source",
            OutputKind::Ferre => "ferre",
            OutputKind::ApogeeNet => "apogee_net",
            OutputKind::Aspcap => "aspcap",
            OutputKind::TheCannon => "the_cannon",
        }
    }

    /// Pipeline-specific columns, excluding the shared key columns.
    pub fn columns(&self) -> &'static [ColumnSpec] {
        static CLASSIFIER: OnceLock<Vec<ColumnSpec>> = OnceLock::new();
        static CLASSIFY_SOURCE: OnceLock<Vec<ColumnSpec>> = OnceLock::new();
        static FERRE: OnceLock<Vec<ColumnSpec>> = OnceLock::new();
        static APOGEE_NET: OnceLock<Vec<ColumnSpec>> = OnceLock::new();
        static ASPCAP: OnceLock<Vec<ColumnSpec>> = OnceLock::new();
        static THE_CANNON: OnceLock<Vec<ColumnSpec>> = OnceLock::new();

        match self {
            OutputKind::Classifier => CLASSIFIER.get_or_init(columns::classifier_columns).as_slice(),
            OutputKind::ClassifySource => {
                CLASSIFY_SOURCE.get_or_init(columns::classify_source_columns).as_slice()
            }
            OutputKind::Ferre => FERRE.get_or_init(columns::ferre_columns).as_slice(),
            OutputKind::ApogeeNet => APOGEE_NET.get_or_init(columns::apogee_net_columns).as_slice(),
            OutputKind::Aspcap => ASPCAP.get_or_init(columns::aspcap_columns).as_slice(),
            OutputKind::TheCannon => THE_CANNON.get_or_init(columns::the_cannon_columns).as_slice(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Columns that must be present on every insert.
    pub fn required_columns(&self) -> impl Iterator<Item = &'static ColumnSpec> {
        self.columns().iter().filter(|c| c.is_required())
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputKind {
    type Err = OutputError;

    /// Accepts the kind name (`the_cannon`) or the table name (`thecannonoutput`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == needle || kind.table() == needle)
            .ok_or_else(|| OutputError::UnknownKind(s.to_string()))
    }
}
