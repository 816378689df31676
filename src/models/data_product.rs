//! Data products and the astronomical sources they observe.

use serde::{Deserialize, Serialize};

/// Release assumed when a data product does not name one.
pub const DEFAULT_RELEASE: &str = "sdss5";

/// A reduced data product, identified by release, filetype and path keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProduct {
    pub id: i64,
    pub release: String,
    pub filetype: String,
    pub kwargs: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    /// Relative cost measure (e.g. number of visits); only comparable within
    /// one release and filetype.
    pub size: Option<i64>,
}

impl DataProduct {
    /// Returns a string keyword, if present.
    pub fn keyword(&self, name: &str) -> Option<&str> {
        self.kwargs.get(name).and_then(|v| v.as_str())
    }
}

/// Fields required to register a data product.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataProduct {
    pub release: String,
    pub filetype: String,
    pub kwargs: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub size: Option<i64>,
}

impl NewDataProduct {
    pub fn new(filetype: impl Into<String>, kwargs: serde_json::Value) -> Self {
        Self {
            release: DEFAULT_RELEASE.to_string(),
            filetype: filetype.into(),
            kwargs,
            metadata: None,
            size: None,
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }
}

/// An astronomical source, keyed by catalog identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub catalogid: i64,
    pub sdssv_target0: Option<i64>,
    pub sdssv_first_carton_name: Option<String>,
}

impl Source {
    pub fn new(catalogid: i64) -> Self {
        Self {
            catalogid,
            sdssv_target0: None,
            sdssv_first_carton_name: None,
        }
    }

    pub fn with_carton(mut self, carton: impl Into<String>) -> Self {
        self.sdssv_first_carton_name = Some(carton.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_data_product_defaults() {
        let dp = NewDataProduct::new("apStar", json!({"obj": "2M00000002+7417074"}));
        assert_eq!(dp.release, "sdss5");
        assert!(dp.size.is_none());

        let dp = dp.with_release("dr17").with_size(3);
        assert_eq!(dp.release, "dr17");
        assert_eq!(dp.size, Some(3));
    }

    #[test]
    fn test_keyword_lookup() {
        let dp = DataProduct {
            id: 1,
            release: "dr17".to_string(),
            filetype: "apStar".to_string(),
            kwargs: json!({"obj": "2M0001", "apred": "dr17", "mjd": 59000}),
            metadata: None,
            size: None,
        };
        assert_eq!(dp.keyword("obj"), Some("2M0001"));
        assert_eq!(dp.keyword("mjd"), None);
        assert_eq!(dp.keyword("field"), None);
    }
}
