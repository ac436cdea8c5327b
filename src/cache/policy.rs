//! Which operations are cacheable, and how their keys are formed.

use std::collections::HashMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::key::KeyClass;

/// Guideline sources with `search_<src>_guidelines` / `get_<src>_guideline`.
pub const GUIDELINE_SOURCES: [&str; 6] = ["nice", "us", "who", "india", "canada", "australia"];

/// Drug sources with `search_<src>_drugs` / `get_<src>_drug`.
pub const DRUG_SOURCES: [&str; 3] = ["bnf", "dailymed", "openfda"];

/// Cache rule for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheRule {
    pub class: KeyClass,
    /// Argument field forming the raw key; `None` keys on the whole
    /// argument object.
    #[serde(default)]
    pub key_field: Option<String>,
}

impl CacheRule {
    pub fn new(class: KeyClass, key_field: Option<&str>) -> Self {
        Self {
            class,
            key_field: key_field.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    rules: HashMap<String, CacheRule>,
}

impl CachePolicy {
    /// No operation is cacheable.
    pub fn none() -> Self {
        Self::default()
    }

    /// Rules for the built-in guideline and drug servers.
    pub fn builtin() -> Self {
        let mut policy = Self::none();
        for src in GUIDELINE_SOURCES {
            policy.insert(
                &format!("search_{src}_guidelines"),
                CacheRule::new(KeyClass::Guideline, Some("query")),
            );
            policy.insert(
                &format!("get_{src}_guideline"),
                CacheRule::new(KeyClass::Guideline, Some("guideline_id")),
            );
        }
        for src in DRUG_SOURCES {
            policy.insert(
                &format!("search_{src}_drugs"),
                CacheRule::new(KeyClass::DrugSearch, Some("name")),
            );
            policy.insert(
                &format!("get_{src}_drug"),
                CacheRule::new(KeyClass::DrugDetail, Some("drug_id")),
            );
        }
        policy
    }

    pub fn insert(&mut self, operation: &str, rule: CacheRule) {
        self.rules.insert(operation.to_string(), rule);
    }

    /// Merge `extra` rules over this policy.
    pub fn with_rules(mut self, extra: &HashMap<String, CacheRule>) -> Self {
        for (op, rule) in extra {
            self.insert(op, rule.clone());
        }
        self
    }

    pub fn rule_for(&self, operation: &str) -> Option<&CacheRule> {
        self.rules.get(operation)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Class and raw key for a call, or `None` if the call is not cacheable.
    ///
    /// The raw key is the operation name, the key field's value (if the rule
    /// names one) and a digest of every other argument. The key field is
    /// normalized with the rest of the key; the digest is taken before
    /// normalization, so arguments that differ only in case stay distinct.
    pub fn key_for(
        &self,
        operation: &str,
        arguments: &serde_json::Value,
    ) -> Option<(KeyClass, String)> {
        let rule = self.rule_for(operation)?;
        let Some(field) = &rule.key_field else {
            return Some((rule.class, format!("{operation} #{}", args_digest(arguments)?)));
        };

        let term = match arguments.get(field)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };

        let mut rest = arguments.as_object()?.clone();
        rest.remove(field);
        let raw = if rest.is_empty() {
            format!("{operation} {term}")
        } else {
            let digest = args_digest(&serde_json::Value::Object(rest))?;
            format!("{operation} {term} #{digest}")
        };
        Some((rule.class, raw))
    }
}

/// Short SHA-256 of the canonical JSON of `value`.
///
/// serde_json maps are ordered, so the serialization does not depend on the
/// order the caller wrote the fields in.
fn args_digest(value: &serde_json::Value) -> Option<String> {
    let canonical = serde_json::to_string(value).ok()?;
    let digest = Sha256::digest(canonical.as_bytes());
    Some(digest.iter().take(8).map(|b| format!("{b:02x}")).collect())
}
