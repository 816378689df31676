//! Column catalogues for the per-pipeline output tables.
//!
//! The wide tables (ASPCAP, The Cannon) are generated from element and label
//! lists rather than written out by hand.

use super::OutputValue;

/// Default log-probability for classes a classifier did not score.
pub const SMALL: f64 = -1e-20;

/// Storage type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Float,
    Integer,
    BigInteger,
    Boolean,
}

impl ColumnType {
    /// SQL type used in table definitions.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Float => "REAL",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInteger => "BIGINT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Float => "float",
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "bigint",
            ColumnType::Boolean => "boolean",
        }
    }

    /// Whether a value of this kind can be stored in a column of this type.
    pub fn accepts(&self, value: &OutputValue) -> bool {
        match (self, value) {
            (_, OutputValue::Null) => true,
            (ColumnType::Float, OutputValue::Float(_) | OutputValue::Integer(_)) => true,
            (ColumnType::Integer | ColumnType::BigInteger, OutputValue::Integer(_)) => true,
            (ColumnType::Boolean, OutputValue::Boolean(_)) => true,
            _ => false,
        }
    }
}

/// Definition of one column in a pipeline output table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<OutputValue>,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::BigInteger)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column nullable when `null` is true.
    pub fn nullable_if(self, null: bool) -> Self {
        if null {
            self.nullable()
        } else {
            self
        }
    }

    pub fn with_default(mut self, value: impl Into<OutputValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// A column that must be supplied on insert.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    /// Column clause for `CREATE TABLE`.
    pub fn ddl(&self) -> String {
        let mut clause = format!("{} {}", self.name, self.ty.sql_type());
        if !self.nullable {
            clause.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            clause.push_str(" DEFAULT ");
            clause.push_str(&default.sql_literal());
        }
        clause
    }
}

const CLASSES: [&str; 6] = ["cv", "fgkm", "hotstar", "wd", "sb2", "yso"];

fn class_probability_columns() -> Vec<ColumnSpec> {
    CLASSES
        .iter()
        .flat_map(|class| {
            [
                ColumnSpec::float(format!("p_{}", class)).with_default(0.0),
                ColumnSpec::float(format!("lp_{}", class)).with_default(SMALL),
            ]
        })
        .collect()
}

pub(crate) fn classifier_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::boolean("dithered"), ColumnSpec::float("snr")];
    columns.extend(class_probability_columns());
    columns
}

pub(crate) fn classify_source_columns() -> Vec<ColumnSpec> {
    class_probability_columns()
}

/// FERRE grid dimensions, in grid order. Not every grid uses all of them.
const FERRE_PARAMETERS: [(&str, bool); 8] = [
    ("teff", false),
    ("logg", false),
    ("metals", false),
    ("lgvsini", true),
    ("log10vdop", true),
    ("o_mg_si_s_ca_ti", true),
    ("c", true),
    ("n", true),
];

pub(crate) fn ferre_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::float("snr")];
    for (name, null) in FERRE_PARAMETERS {
        columns.push(ColumnSpec::float(name).nullable_if(null));
    }
    for (name, null) in FERRE_PARAMETERS {
        columns.push(ColumnSpec::float(format!("u_{}", name)).nullable_if(null));
    }
    for (name, _) in FERRE_PARAMETERS {
        columns.push(ColumnSpec::integer(format!("bitmask_{}", name)).with_default(0i64));
    }
    columns.extend([
        ColumnSpec::float("log_chisq_fit"),
        ColumnSpec::float("log_snr_sq"),
        ColumnSpec::float("frac_phot_data_points").with_default(0.0),
        ColumnSpec::float("penalized_log_chisq_fit").nullable(),
        ColumnSpec::float("ferre_time_elapsed").nullable(),
        ColumnSpec::float("ferre_time_load").nullable(),
        ColumnSpec::integer("ferre_n_threads").nullable(),
        ColumnSpec::integer("ferre_n_obj").nullable(),
    ]);
    columns
}

pub(crate) fn apogee_net_columns() -> Vec<ColumnSpec> {
    let mut columns: Vec<ColumnSpec> = [
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
    ]
    .into_iter()
    .map(ColumnSpec::float)
    .collect();
    columns.push(ColumnSpec::integer("bitmask_flag").with_default(0i64));
    columns
}

/// Stellar parameters reported by ASPCAP.
pub const ASPCAP_PARAMETERS: [&str; 8] = [
    "teff",
    "logg",
    "metals",
    "log10vdop",
    "o_mg_si_s_ca_ti",
    "lgvsini",
    "c",
    "n",
];

const ASPCAP_NULLABLE_PARAMETERS: [&str; 5] = ["lgvsini", "log10vdop", "o_mg_si_s_ca_ti", "c", "n"];

/// Elements with abundances reported by ASPCAP.
pub const ASPCAP_ELEMENTS: [&str; 21] = [
    "cn", "al", "ca", "ce", "co", "cr", "fe", "k", "mg", "mn", "na", "nd", "ni", "o", "p", "rb",
    "si", "s", "ti", "v", "yb",
];

pub(crate) fn aspcap_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::float("snr")];
    for name in ASPCAP_PARAMETERS {
        let null = ASPCAP_NULLABLE_PARAMETERS.contains(&name);
        columns.push(ColumnSpec::float(name).nullable_if(null));
        columns.push(ColumnSpec::float(format!("u_{}", name)).nullable_if(null));
        columns.push(ColumnSpec::integer(format!("bitmask_{}", name)).with_default(0i64));
    }
    columns.push(ColumnSpec::float("log_chisq_fit"));
    columns.push(ColumnSpec::float("log_snr_sq"));

    // Every abundance is optional and carries its own fit quality.
    for element in ASPCAP_ELEMENTS {
        columns.push(ColumnSpec::float(format!("{}_h", element)).nullable());
        columns.push(ColumnSpec::float(format!("u_{}_h", element)).nullable());
        columns.push(ColumnSpec::integer(format!("bitmask_{}_h", element)).with_default(0i64));
        columns.push(ColumnSpec::float(format!("log_chisq_fit_{}_h", element)).nullable());
    }
    columns
}

/// Labels estimated by The Cannon, in model order.
pub const CANNON_LABELS: [&str; 19] = [
    "teff", "logg", "fe_h", "c_h", "n_h", "o_h", "na_h", "mg_h", "al_h", "si_h", "s_h", "k_h",
    "ca_h", "ti_h", "v_h", "cr_h", "mn_h", "co_h", "ni_h",
];

/// Correlation column names for every label pair, ordered by the later label.
pub fn cannon_correlation_columns() -> Vec<String> {
    let mut names = Vec::with_capacity(CANNON_LABELS.len() * (CANNON_LABELS.len() - 1) / 2);
    for (j, later) in CANNON_LABELS.iter().enumerate() {
        for earlier in &CANNON_LABELS[..j] {
            names.push(format!("rho_{}_{}", earlier, later));
        }
    }
    names
}

pub(crate) fn the_cannon_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![
        ColumnSpec::float("snr"),
        ColumnSpec::integer("bitmask_flag").with_default(0i64),
        ColumnSpec::float("chi_sq"),
        ColumnSpec::float("reduced_chi_sq"),
    ];
    for label in CANNON_LABELS {
        columns.push(ColumnSpec::float(label));
        columns.push(ColumnSpec::float(format!("u_{}", label)));
    }
    columns.extend(
        cannon_correlation_columns()
            .into_iter()
            .map(|name| ColumnSpec::float(name).with_default(0.0)),
    );
    columns
}
