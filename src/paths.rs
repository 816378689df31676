//! Resolving data products to filesystem paths.
//!
//! Each filetype has a path template with `{keyword}` placeholders filled from
//! the data product's kwargs and `$VARIABLE` references expanded from the
//! environment.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::AstraConfig;
use crate::error::PathError;
use crate::models::DataProduct;

/// Template for combined APOGEE spectra.
pub const AP_STAR_TEMPLATE: &str =
    "$APOGEE_REDUX/{apred}/stars/{telescope}/{field}/{prefix}Star-{apred}-{obj}.fits";

fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("Invalid keyword pattern"))
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("Invalid environment variable pattern")
    })
}

/// Maps filetypes to path templates.
#[derive(Debug, Clone)]
pub struct PathResolver {
    templates: HashMap<String, String>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    /// Creates a resolver that knows the built-in templates.
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert("apStar".to_string(), AP_STAR_TEMPLATE.to_string());
        Self { templates }
    }

    /// Built-in templates plus those configured under `data_product_paths`.
    pub fn from_config(config: &AstraConfig) -> Self {
        let mut resolver = Self::new();
        for (filetype, template) in &config.data_product_paths {
            resolver = resolver.with_template(filetype.clone(), template.clone());
        }
        resolver
    }

    /// Registers or replaces the template for a filetype.
    pub fn with_template(mut self, filetype: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(filetype.into(), template.into());
        self
    }

    pub fn template(&self, filetype: &str) -> Option<&str> {
        self.templates.get(filetype).map(String::as_str)
    }

    /// Resolves a data product using the process environment.
    pub fn resolve(&self, data_product: &DataProduct) -> Result<PathBuf, PathError> {
        self.resolve_with_env(data_product, |name| std::env::var(name).ok())
    }

    /// Resolves a data product, looking variables up with `env`.
    pub fn resolve_with_env<F>(&self, data_product: &DataProduct, env: F) -> Result<PathBuf, PathError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let template =
            self.template(&data_product.filetype)
                .ok_or_else(|| PathError::UnknownFiletype {
                    release: data_product.release.clone(),
                    filetype: data_product.filetype.clone(),
                })?;

        let kwargs = data_product
            .kwargs
            .as_object()
            .ok_or_else(|| PathError::InvalidKwargs(data_product.kwargs.to_string()))?;

        let mut keywords = HashMap::with_capacity(kwargs.len());
        for (key, value) in kwargs {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            keywords.insert(key.as_str(), text);
        }

        if let Some(field) = keywords.get_mut("field") {
            if field.starts_with(' ') {
                tracing::warn!(
                    release = %data_product.release,
                    filetype = %data_product.filetype,
                    kwargs = %data_product.kwargs,
                    "Field name starts with spaces"
                );
                *field = field.trim().to_string();
            }
        }

        // Variables first, so `${VAR}` is not taken for a `{keyword}`.
        let expanded = replace_all(env_pattern(), template, |caps| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            env(name).ok_or_else(|| PathError::MissingEnvVar(name.to_string()))
        })?;

        let filled = replace_all(keyword_pattern(), &expanded, |caps| {
            let keyword = &caps[1];
            keywords
                .get(keyword)
                .cloned()
                .ok_or_else(|| PathError::MissingKeyword {
                    filetype: data_product.filetype.clone(),
                    keyword: keyword.to_string(),
                })
        })?;

        Ok(PathBuf::from(filled))
    }
}

/// Like [`Regex::replace_all`], but the replacement may fail.
fn replace_all<F>(pattern: &Regex, text: &str, mut replacement: F) -> Result<String, PathError>
where
    F: FnMut(&Captures<'_>) -> Result<String, PathError>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replacement(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
