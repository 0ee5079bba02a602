//! Relabeling engine: turns parsed log fields into metric label values.
//!
//! Rule lists are resolved once at namespace startup into an immutable
//! schema; the per-line path is a pure transform over that schema.

use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::error::{ExporterError, Result};

/// Label name that triggers the derived `status_group` tag.
pub const STATUS_LABEL: &str = "status";

#[derive(Debug, Clone, Deserialize)]
pub struct RelabelConfig {
    /// Metric label this rule produces.
    pub target_label: String,

    /// Log field the value is taken from.
    pub from: String,

    /// 1-based whitespace token to select from the field value; 0 disables
    /// splitting.
    #[serde(default)]
    pub split: usize,

    /// First matching pattern rewrites the value (capture groups allowed in
    /// the replacement).
    #[serde(default)]
    pub matches: Vec<MatchRule>,

    /// When non-empty, values outside the whitelist collapse to "other".
    #[serde(default)]
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchRule {
    pub regexp: String,
    pub replacement: String,
}

/// Built-in rules appended after the configured ones: HTTP method from the
/// request line and the response status code.
fn default_rules() -> Vec<RelabelConfig> {
    vec![
        RelabelConfig {
            target_label: "method".to_string(),
            from: "request".to_string(),
            split: 1,
            matches: Vec::new(),
            whitelist: Vec::new(),
        },
        RelabelConfig {
            target_label: STATUS_LABEL.to_string(),
            from: STATUS_LABEL.to_string(),
            split: 0,
            matches: Vec::new(),
            whitelist: Vec::new(),
        },
    ]
}

struct CompiledRule {
    target_label: String,
    from: String,
    split: usize,
    matches: Vec<(Regex, String)>,
    whitelist: Option<HashSet<String>>,
}

impl CompiledRule {
    fn compile(cfg: &RelabelConfig) -> Result<Self> {
        let mut matches = Vec::with_capacity(cfg.matches.len());
        for rule in &cfg.matches {
            let re = Regex::new(&rule.regexp).map_err(|e| ExporterError::Relabel {
                target: cfg.target_label.clone(),
                reason: format!("bad pattern '{}': {}", rule.regexp, e),
            })?;
            matches.push((re, rule.replacement.clone()));
        }
        let whitelist = if cfg.whitelist.is_empty() {
            None
        } else {
            Some(cfg.whitelist.iter().cloned().collect())
        };
        Ok(Self {
            target_label: cfg.target_label.clone(),
            from: cfg.from.clone(),
            split: cfg.split,
            matches,
            whitelist,
        })
    }

    /// Apply the mapping function to one raw field value. None means the
    /// mapping failed and the label position stays empty for this line.
    fn map(&self, raw: &str) -> Option<String> {
        let mut value = if self.split > 0 {
            raw.split(' ').nth(self.split - 1)?.to_string()
        } else {
            raw.to_string()
        };

        for (re, replacement) in &self.matches {
            if re.is_match(&value) {
                value = re.replace(&value, replacement.as_str()).into_owned();
                break;
            }
        }

        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&value) {
                value = "other".to_string();
            }
        }

        Some(value)
    }
}

pub struct RelabelSchema {
    rules: Vec<CompiledRule>,
}

impl RelabelSchema {
    /// Resolve the effective rule list: configured rules first, then the
    /// built-in defaults, deduplicated by target label with the first
    /// occurrence winning.
    pub fn compile(configs: &[RelabelConfig]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::new();
        for cfg in configs.iter().chain(default_rules().iter()) {
            if !seen.insert(cfg.target_label.clone()) {
                continue;
            }
            rules.push(CompiledRule::compile(cfg)?);
        }
        Ok(Self { rules })
    }

    pub fn target_labels(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.target_label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Map one line's parsed fields to ordered label values and flattened
    /// `target:value` tag pairs. A missing source field or failed mapping
    /// leaves that position as the empty string; the rest of the rules still
    /// run. A rule targeting the status label additionally emits the derived
    /// `status_group:<d>xx` tag.
    pub fn map(&self, fields: &HashMap<String, String>) -> (Vec<String>, Vec<String>) {
        let mut values = vec![String::new(); self.rules.len()];
        let mut tags = Vec::new();

        for (i, rule) in self.rules.iter().enumerate() {
            let Some(raw) = fields.get(&rule.from) else {
                continue;
            };
            let Some(mapped) = rule.map(raw) else {
                continue;
            };
            tags.push(format!("{}:{}", rule.target_label, mapped));
            if rule.target_label == STATUS_LABEL {
                if let Some(digit) = mapped.chars().next() {
                    tags.push(format!("status_group:{}xx", digit));
                }
            }
            values[i] = mapped;
        }

        (values, tags)
    }
}
