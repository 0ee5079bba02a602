//! Label vector assembly.
//!
//! A namespace's label schema is fixed once at startup: static label names
//! first, then the relabel targets, in configuration order. Every observation
//! reuses the same schema so position *i* always means the same label for the
//! life of the namespace.

use metrics::Label;
use once_cell::sync::Lazy;
use std::process::Command;

use crate::config::NamespaceConfig;
use crate::relabel::RelabelSchema;

static HOSTNAME: Lazy<String> = Lazy::new(resolve_hostname);
static SERVER_IP: Lazy<String> = Lazy::new(resolve_server_ip);

pub type LabelVector = Vec<String>;

pub struct LabelSchema {
    names: Vec<String>,
    static_values: Vec<String>,
    base_tags: Vec<String>,
}

impl LabelSchema {
    pub fn new(ns: &NamespaceConfig, relabel: &RelabelSchema) -> Self {
        let mut names = ns.ordered_label_names();
        names.extend(relabel.target_labels());

        let static_values = ns.ordered_label_values();

        let mut base_tags: Vec<String> = ns
            .labels
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        base_tags.push(format!("{}_hostname:{}", ns.name, *HOSTNAME));
        base_tags.push(format!("{}_ip:{}", ns.name, *SERVER_IP));

        Self {
            names,
            static_values,
            base_tags,
        }
    }

    /// Number of label positions (static + dynamic).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn label_names(&self) -> &[String] {
        &self.names
    }

    /// Positional concatenation: static values first, dynamic values second.
    pub fn assemble(&self, dynamic_values: Vec<String>) -> LabelVector {
        let mut vector = Vec::with_capacity(self.names.len());
        vector.extend(self.static_values.iter().cloned());
        vector.extend(dynamic_values);
        vector
    }

    /// Pair a vector with the schema's label names for the pull registry.
    pub fn metric_labels(&self, vector: &[String]) -> Vec<Label> {
        self.names
            .iter()
            .zip(vector.iter())
            .map(|(name, value)| Label::new(name.clone(), value.clone()))
            .collect()
    }

    /// Static labels only, for the unlabeled-per-line instruments.
    pub fn static_metric_labels(&self) -> Vec<Label> {
        self.names
            .iter()
            .zip(self.static_values.iter())
            .map(|(name, value)| Label::new(name.clone(), value.clone()))
            .collect()
    }

    /// Full flattened tag list for one line: namespace base tags (static
    /// pairs, hostname, ip) followed by the line's dynamic tags.
    pub fn line_tags(&self, dynamic_tags: Vec<String>) -> Vec<String> {
        let mut tags = self.base_tags.clone();
        tags.extend(dynamic_tags);
        tags
    }

    pub fn base_tags(&self) -> &[String] {
        &self.base_tags
    }
}

/// Best-effort hostname; empty string when it cannot be resolved.
fn resolve_hostname() -> String {
    Command::new("hostname")
        .output()
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .unwrap_or_default()
}

/// Host IP taken from the primary kernel-scope route, resolved once at
/// startup. Degrades to empty, never fatal.
fn resolve_server_ip() -> String {
    let Ok(output) = Command::new("ip").arg("r").output() else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let mut result = String::new();
    for line in text.lines() {
        if line.contains("proto kernel") && line.contains("scope link") {
            if let Some(last) = line.split_whitespace().last() {
                result = last.to_string();
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn test_namespace() -> NamespaceConfig {
        let mut labels = BTreeMap::new();
        labels.insert("service".to_string(), "app1".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        NamespaceConfig {
            name: "app1".to_string(),
            prefix: None,
            format: "$status $body_bytes_sent".to_string(),
            source_files: vec![PathBuf::from("access.log")],
            syslog: None,
            labels,
            relabel_configs: Vec::new(),
            histogram_buckets: vec![0.1, 1.0],
            print_log: false,
        }
    }

    #[test]
    fn test_positions_are_static_then_dynamic() {
        let ns = test_namespace();
        let relabel = RelabelSchema::compile(&ns.relabel_configs).unwrap();
        let schema = LabelSchema::new(&ns, &relabel);

        assert_eq!(schema.label_names(), ["env", "service", "method", "status"]);
        let vector = schema.assemble(vec!["GET".to_string(), "200".to_string()]);
        assert_eq!(vector, ["prod", "app1", "GET", "200"]);
        assert_eq!(vector.len(), schema.len());
    }

    #[test]
    fn test_vector_length_is_fixed_when_extraction_fails() {
        let ns = test_namespace();
        let relabel = RelabelSchema::compile(&ns.relabel_configs).unwrap();
        let schema = LabelSchema::new(&ns, &relabel);

        let vector = schema.assemble(vec![String::new(), "200".to_string()]);
        assert_eq!(vector, ["prod", "app1", "", "200"]);
    }

    #[test]
    fn test_line_tags_include_base_tags() {
        let ns = test_namespace();
        let relabel = RelabelSchema::compile(&ns.relabel_configs).unwrap();
        let schema = LabelSchema::new(&ns, &relabel);

        let tags = schema.line_tags(vec!["status:200".to_string()]);
        assert!(tags.contains(&"service:app1".to_string()));
        assert!(tags.contains(&"env:prod".to_string()));
        assert!(tags.iter().any(|t| t.starts_with("app1_hostname:")));
        assert!(tags.iter().any(|t| t.starts_with("app1_ip:")));
        assert_eq!(tags.last().unwrap(), "status:200");
    }
}
