//! Per-test Probe Dock metadata.
//!
//! Tests opt into tracking through an annotation: a small map of attributes
//! (`key`, `name`, `category`, `tags`, `tickets`, `active`). Discovery is the
//! host's business; this module only holds the resulting lookup table and
//! validates the attributes.
//!
//! ```yaml
//! "App\\Tests\\CartTest::testAddsItem":
//!   key: 8f3a2c91
//!   tags: cart,smoke
//!   tickets: [SHOP-12]
//! ```

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::{ReporterError, ReporterResult};

/// Attributes as written by the test author, unvalidated.
pub type RawAnnotation = BTreeMap<String, Value>;

/// Validated annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAnnotation {
    pub key: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub tickets: Vec<String>,
    pub active: bool,
}

impl TestAnnotation {
    /// Validate the raw attributes of `test`.
    ///
    /// Only the key is mandatory; an unusable name or category is ignored.
    pub fn parse(test: &str, raw: &RawAnnotation) -> ReporterResult<Self> {
        let key = match raw.get("key") {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            _ => {
                return Err(ReporterError::Annotation {
                    test: test.to_string(),
                    message: "an @ProbeDock annotation was found, but the Probe Dock test key is not valid (must be a non-empty string)".to_string(),
                })
            }
        };

        Ok(Self {
            key,
            name: non_empty_string(raw.get("name")),
            category: non_empty_string(raw.get("category")),
            tags: string_list(raw.get("tags")),
            tickets: string_list(raw.get("tickets")),
            active: raw.get("active").map_or(true, is_truthy),
        })
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Comma-separated string or list of strings; blank items are dropped.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// `1`, `y`, `yes`, `t` and `true` in any case.
fn is_truthy(value: &Value) -> bool {
    let text = match value {
        Value::String(s) => s.trim().to_ascii_lowercase(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return false,
    };
    matches!(text.as_str(), "1" | "y" | "yes" | "t" | "true")
}

/// Lookup table from test identifier (`Class::method`) to its annotation.
#[derive(Debug, Clone, Default)]
pub struct AnnotationRegistry {
    by_test: HashMap<String, RawAnnotation>,
}

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, test_id: impl Into<String>, annotation: RawAnnotation) {
        self.by_test.insert(test_id.into(), annotation);
    }

    /// Builder-style insert.
    pub fn with(mut self, test_id: impl Into<String>, annotation: RawAnnotation) -> Self {
        self.insert(test_id, annotation);
        self
    }

    pub fn get(&self, test_id: &str) -> Option<&RawAnnotation> {
        self.by_test.get(test_id)
    }

    pub fn len(&self) -> usize {
        self.by_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_test.is_empty()
    }

    /// Load a table generated by a discovery step, as YAML.
    pub fn from_yaml(text: &str) -> ReporterResult<Self> {
        let by_test: HashMap<String, RawAnnotation> =
            serde_yaml::from_str(text).map_err(|e| {
                ReporterError::config(format!("invalid annotation table: {}", e))
            })?;
        Ok(Self { by_test })
    }

    /// Load a table generated by a discovery step, as JSON.
    pub fn from_json(text: &str) -> ReporterResult<Self> {
        let by_test: HashMap<String, RawAnnotation> =
            serde_json::from_str(text).map_err(|e| {
                ReporterError::config(format!("invalid annotation table: {}", e))
            })?;
        Ok(Self { by_test })
    }
}

/// Build a [`RawAnnotation`] from attribute pairs.
pub fn raw_annotation<I, K>(attributes: I) -> RawAnnotation
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    attributes.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
