//! The structured clinical answer and its lenient parser.
//!
//! Parsing never fails: strict JSON first, then the outermost bracketed
//! substring, then an empty answer.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl From<String> for Confidence {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" | "moderate" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Detail fetched for one drug identifier. Shared between every treatment
/// that names the drug.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugEnrichment {
    /// The identifier as named in the answer.
    pub drug: String,
    /// Identifier returned by the search step.
    pub source_id: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, alias = "drugs")]
    pub drug_ids: Vec<String>,
    /// Filled by the enrichment pass; `None` marks a failed lookup.
    #[serde(default, skip_deserializing)]
    pub enrichment: BTreeMap<String, Option<Arc<DrugEnrichment>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(alias = "name", alias = "diagnosis")]
    pub label: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub treatments: Vec<Treatment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    #[serde(default)]
    pub diagnoses: Vec<Diagnosis>,
}

impl StructuredAnswer {
    pub fn is_empty(&self) -> bool {
        self.diagnoses.is_empty()
    }

    /// All drug identifiers across all treatments, trimmed and de-duplicated
    /// case-insensitively, in order of first appearance.
    pub fn drug_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.treatments()
            .flat_map(|t| t.drug_ids.iter())
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(id.to_lowercase()))
            .map(String::from)
            .collect()
    }

    /// Attach enrichment records to every treatment referencing each drug.
    /// `records` is keyed by the lowercased identifier.
    pub fn attach_enrichment(&mut self, records: &BTreeMap<String, Option<Arc<DrugEnrichment>>>) {
        for treatment in self.diagnoses.iter_mut().flat_map(|d| d.treatments.iter_mut()) {
            for id in &treatment.drug_ids {
                let trimmed = id.trim();
                if let Some(record) = records.get(&trimmed.to_lowercase()) {
                    treatment
                        .enrichment
                        .insert(trimmed.to_string(), record.clone());
                }
            }
        }
    }

    fn treatments(&self) -> impl Iterator<Item = &Treatment> {
        self.diagnoses.iter().flat_map(|d| d.treatments.iter())
    }
}

/// How a final text was turned into an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Strict,
    Bracketed,
    Empty,
}

/// Parse a final reasoning text into an answer.
pub fn parse_structured_answer(text: &str) -> (StructuredAnswer, ParseMode) {
    if let Some(answer) = decode(text.trim()) {
        return (answer, ParseMode::Strict);
    }

    if let Some(answer) = outermost_bracketed(text).and_then(decode) {
        return (answer, ParseMode::Bracketed);
    }

    tracing::warn!(
        text_len = text.len(),
        "final answer unparseable, returning empty answer"
    );
    (StructuredAnswer::default(), ParseMode::Empty)
}

/// An answer object, or a bare array of diagnoses.
fn decode(candidate: &str) -> Option<StructuredAnswer> {
    if candidate.starts_with('[') {
        let diagnoses: Vec<Diagnosis> = serde_json::from_str(candidate).ok()?;
        return Some(StructuredAnswer { diagnoses });
    }
    serde_json::from_str(candidate).ok()
}

/// The substring from the first `{` or `[` to its matching close, skipping
/// brackets inside JSON strings.
fn outermost_bracketed(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
