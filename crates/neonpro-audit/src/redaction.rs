use crate::entry::AuditDetails;
use neonpro_core::DataClassification;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Replacement written in place of any redacted value.
pub const MASK_TOKEN: &str = "[REDACTED]";

/// Kinds of Brazilian PII recognised inside free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    /// Company taxpayer id, `00.000.000/0000-00`.
    Cnpj,
    /// Individual taxpayer id, `000.000.000-00`.
    Cpf,
    /// E-mail address.
    Email,
    /// Phone number with area code.
    Phone,
}

// CNPJ before CPF: a CNPJ contains a CPF-shaped prefix.
const PII_PATTERNS: &[(PiiKind, &str)] = &[
    (PiiKind::Cnpj, r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b"),
    (PiiKind::Cpf, r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b"),
    (PiiKind::Email, r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    (
        PiiKind::Phone,
        r"(?:\+55\s?)?\(\d{2}\)\s?9?\d{4}-?\d{4}|\+55\s?\d{2}\s?9?\d{4}-?\d{4}",
    ),
];

// Key segments that identify a person or their health, whatever the caller tagged.
const SENSITIVE_KEYS: &[&str] = &[
    "cpf", "cnpj", "rg", "cns", "email", "phone", "telefone", "celular", "name", "nome",
    "address", "endereco", "birthdate", "nascimento",
];
const CRITICAL_KEYS: &[&str] = &[
    "diagnosis", "diagnostico", "prontuario", "prescription", "prescricao", "medical",
];

struct PiiPattern {
    kind: PiiKind,
    regex: Regex,
}

/// Result of redacting a set of tagged details.
#[derive(Debug, Clone, PartialEq)]
pub struct Redacted {
    /// Values safe to store.
    pub details: BTreeMap<String, Value>,
    /// Keys whose whole value was replaced by [`MASK_TOKEN`].
    pub masked_fields: Vec<String>,
    /// PII fragments masked inside otherwise storable text.
    pub pii_matches: usize,
}

/// Masks sensitive values before they are written to the audit store.
///
/// A field is masked whole when it is tagged `sensitive`/`critical` or when its
/// key names personal or clinical data. Remaining strings have control
/// characters stripped and embedded CPF, CNPJ, e-mail and phone numbers masked.
pub struct Redactor {
    patterns: Vec<PiiPattern>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    /// Redactor with the built-in Brazilian PII patterns.
    pub fn new() -> Self {
        let patterns = PII_PATTERNS
            .iter()
            .filter_map(|(kind, src)| {
                Regex::new(src).ok().map(|regex| PiiPattern { kind: *kind, regex })
            })
            .collect();
        Self { patterns }
    }

    /// Effective classification of a field: the caller's tag, raised by the key name.
    pub fn classify(&self, key: &str, tagged: DataClassification) -> DataClassification {
        let segments = key_segments(key);
        let by_key = if segments.iter().any(|s| CRITICAL_KEYS.contains(&s.as_str())) {
            DataClassification::Critical
        } else if segments.iter().any(|s| SENSITIVE_KEYS.contains(&s.as_str())) {
            DataClassification::Sensitive
        } else {
            DataClassification::Public
        };
        tagged.max(by_key)
    }

    /// Redact all fields of `details`.
    pub fn redact(&self, details: &AuditDetails) -> Redacted {
        let mut out = BTreeMap::new();
        let mut masked_fields = Vec::new();
        let mut pii_matches = 0;

        for (key, field) in details.iter() {
            if self.classify(key, field.classification).requires_redaction() {
                out.insert(key.clone(), Value::String(MASK_TOKEN.to_string()));
                masked_fields.push(key.clone());
            } else {
                out.insert(key.clone(), self.scrub_value(&field.value, &mut pii_matches));
            }
        }

        Redacted {
            details: out,
            masked_fields,
            pii_matches,
        }
    }

    /// Mask PII fragments in free text. Returns the text and the number of matches.
    pub fn mask_text(&self, input: &str) -> (String, usize) {
        let mut text: String = input
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();
        let mut hits = 0;
        for pattern in &self.patterns {
            let found = pattern.regex.find_iter(&text).count();
            if found > 0 {
                hits += found;
                text = pattern.regex.replace_all(&text, MASK_TOKEN).into_owned();
            }
        }
        (text, hits)
    }

    /// Which PII kinds occur in `input`.
    pub fn detect(&self, input: &str) -> Vec<PiiKind> {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(input))
            .map(|p| p.kind)
            .collect()
    }

    fn scrub_value(&self, value: &Value, hits: &mut usize) -> Value {
        match value {
            Value::String(s) => {
                let (masked, found) = self.mask_text(s);
                *hits += found;
                Value::String(masked)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.scrub_value(v, hits)).collect())
            }
            Value::Object(map) => {
                let mut scrubbed = serde_json::Map::new();
                for (k, v) in map {
                    if self.classify(k, DataClassification::Public).requires_redaction() {
                        scrubbed.insert(k.clone(), Value::String(MASK_TOKEN.to_string()));
                    } else {
                        scrubbed.insert(k.clone(), self.scrub_value(v, hits));
                    }
                }
                Value::Object(scrubbed)
            }
            other => other.clone(),
        }
    }
}

/// Lower-cased key segments, split on punctuation and camelCase boundaries.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
