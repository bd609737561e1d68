use neonpro_core::SubjectType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The entity being evaluated, built fresh from current data for each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSubject {
    /// Opaque identifier of the entity.
    pub subject_id: String,
    /// What kind of entity it is.
    pub subject_type: SubjectType,
    /// Domain classification: ANVISA risk class (`I`-`IV`) for devices, data
    /// classification (`public` … `critical`) for consent and processing subjects.
    #[serde(default)]
    pub classification: String,
    /// Attribute values the rule checks look at.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ComplianceSubject {
    /// A subject with no attributes.
    pub fn new(
        subject_id: impl Into<String>,
        subject_type: SubjectType,
        classification: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_type,
            classification: classification.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: set one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Raw attribute value.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Whether an attribute is present and affirmative.
    ///
    /// `true`, non-blank strings other than `"false"`/`"no"`/`"nao"`, non-zero
    /// numbers and non-empty collections count; missing and `null` do not.
    pub fn flag(&self, key: &str) -> bool {
        match self.attribute(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => {
                let s = s.trim().to_ascii_lowercase();
                !s.is_empty() && !matches!(s.as_str(), "false" | "no" | "nao" | "não" | "0")
            }
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// Trimmed, non-blank string attribute.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric attribute; numeric strings are accepted.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.attribute(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A string attribute or every string in an array attribute.
    pub fn texts(&self, key: &str) -> Vec<&str> {
        match self.attribute(key) {
            Some(Value::String(s)) => vec![s.trim()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .collect(),
            _ => Vec::new(),
        }
    }
}
