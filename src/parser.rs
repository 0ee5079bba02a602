//! Compiler for the `$field`-style access-log format mini-language.
//!
//! A format string like `$remote_addr - $remote_user [$time_local] "$request"`
//! compiles into one anchored regex with a named capture group per field.
//! Each field matches greedily up to the literal character that follows it in
//! the format, so quoted and bracketed fields may contain spaces.

use regex::Regex;
use std::collections::HashMap;

use crate::error::{ExporterError, Result};

pub struct LineParser {
    re: Regex,
}

impl LineParser {
    pub fn compile(format: &str) -> Result<Self> {
        let chars: Vec<char> = format.chars().collect();
        let mut pattern = String::from("^");
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '$'
                && i + 1 < chars.len()
                && (chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_')
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match chars.get(end) {
                    // A field runs up to its next literal delimiter.
                    Some(&delim) => pattern.push_str(&format!(
                        "(?P<{}>[^{}]*)",
                        name,
                        escape_in_class(delim)
                    )),
                    // Trailing field: take the rest of the line.
                    None => pattern.push_str(&format!("(?P<{}>.*)", name)),
                }
                i = end;
            } else {
                pattern.push_str(&regex::escape(&chars[i].to_string()));
                i += 1;
            }
        }
        pattern.push('$');

        let re = Regex::new(&pattern).map_err(|e| ExporterError::Format {
            format: format.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { re })
    }

    /// Parse one line into its field mapping. Returns None when the line does
    /// not conform to the configured grammar.
    pub fn parse(&self, line: &str) -> Option<HashMap<String, String>> {
        let caps = self.re.captures(line)?;
        let mut fields = HashMap::new();
        for name in self.re.capture_names().flatten() {
            let value = caps
                .name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            fields.insert(name.to_string(), value);
        }
        Some(fields)
    }
}

fn escape_in_class(c: char) -> String {
    match c {
        '\\' | ']' | '[' | '^' | '-' => format!("\\{}", c),
        _ => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FORMAT;

    #[test]
    fn test_parse_simple_format() {
        let parser = LineParser::compile("$status $body_bytes_sent").unwrap();
        let fields = parser.parse("200 512").unwrap();
        assert_eq!(fields["status"], "200");
        assert_eq!(fields["body_bytes_sent"], "512");
    }

    #[test]
    fn test_parse_combined_format() {
        let parser = LineParser::compile(DEFAULT_FORMAT).unwrap();
        let line = "10.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] \"GET /apache_pb.gif HTTP/1.0\" 200 2326 \"http://example.com/start.html\" \"Mozilla/4.08\" \"-\"";
        let fields = parser.parse(line).unwrap();
        assert_eq!(fields["remote_addr"], "10.0.0.1");
        assert_eq!(fields["remote_user"], "frank");
        assert_eq!(fields["request"], "GET /apache_pb.gif HTTP/1.0");
        assert_eq!(fields["status"], "200");
        assert_eq!(fields["body_bytes_sent"], "2326");
        assert_eq!(fields["http_user_agent"], "Mozilla/4.08");
    }

    #[test]
    fn test_quoted_field_allows_spaces() {
        let parser = LineParser::compile("\"$request\" $status").unwrap();
        let fields = parser.parse("\"POST /login HTTP/1.1\" 302").unwrap();
        assert_eq!(fields["request"], "POST /login HTTP/1.1");
        assert_eq!(fields["status"], "302");
    }

    #[test]
    fn test_nonconforming_line_is_rejected() {
        let parser =
            LineParser::compile("$remote_addr - $remote_user [$time_local] \"$request\"")
                .unwrap();
        assert!(parser.parse("garbage").is_none());
    }

    #[test]
    fn test_missing_field_is_empty_not_absent() {
        let parser = LineParser::compile("$remote_addr - $remote_user").unwrap();
        let fields = parser.parse("10.0.0.1 - ").unwrap();
        assert_eq!(fields["remote_user"], "");
    }

    #[test]
    fn test_duplicate_field_is_a_format_error() {
        assert!(LineParser::compile("$status $status").is_err());
    }
}
