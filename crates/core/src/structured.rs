//! Parsers for the contents of a structured block.

use serde_yaml::Value;

use crate::types::ValidationVerdict;

/// Optional wrapper key the model may nest the verdict under.
const VALIDATION_KEY: &str = "validation";
/// Language tags a model may put on the first line of a fence.
const FENCE_TAGS: [&str; 4] = ["text", "markdown", "md", "plaintext"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block is not valid yaml: {0}")]
    Syntax(String),
    #[error("block is not a mapping")]
    NotAMapping,
    #[error("block has no recognisable checks")]
    Empty,
}

/// Parse a verdict block. Accepts YAML or JSON, flat or nested under
/// `validation`. Keys are split on case and lower-cased; every key is a
/// check, and values that do not read as a boolean count as failed.
pub fn parse_verdict(block: &str) -> Result<ValidationVerdict, BlockError> {
    let doc: Value = serde_yaml::from_str(block).map_err(|e| BlockError::Syntax(e.to_string()))?;
    let Value::Mapping(mut map) = doc else {
        return Err(BlockError::NotAMapping);
    };
    if let Some(Value::Mapping(inner)) = map.remove(VALIDATION_KEY) {
        map = inner;
    }

    let checks: Vec<(String, bool)> = map
        .iter()
        .filter_map(|(k, v)| Some((key_name(k)?, as_bool(v).unwrap_or(false))))
        .collect();
    if checks.is_empty() {
        return Err(BlockError::Empty);
    }
    Ok(ValidationVerdict::from_checks(checks))
}

fn key_name(key: &Value) -> Option<String> {
    let name = match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let name = split_case(name.trim()).to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// `CustomerName` reads as `Customer Name`.
fn split_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Some(true),
            "false" | "f" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Rephrased text from a fenced block; `None` if nothing is left.
pub fn parse_rephrase(block: &str) -> Option<String> {
    let body = block.trim_start_matches([' ', '\t']);
    let body = match body.split_once('\n') {
        Some((first, rest)) if FENCE_TAGS.contains(&first.trim().to_lowercase().as_str()) => rest,
        _ => body,
    };
    let text = body.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_with_string_booleans() {
        let v = parse_verdict(r#"{"Accomplishment":"TRUE","Impact":"FALSE"}"#).unwrap();
        assert_eq!(v.get("accomplishment"), Some(true));
        assert_eq!(v.get("impact"), Some(false));
        assert!(!v.is_valid());
    }

    #[test]
    fn nested_yaml_front_matter() {
        let block = "\nvalidation:\n  Accomplishment: true\n  Impact: True\n  all: true\n";
        let v = parse_verdict(block).unwrap();
        assert_eq!(v.checks().len(), 3);
        assert!(v.is_valid());
    }

    #[test]
    fn unrecognised_values_fail() {
        let v = parse_verdict("impact: maybe\naccomplishment: 1\nnotes: [a, b]\ncustomer: null\n").unwrap();
        assert_eq!(v.get("impact"), Some(false));
        assert_eq!(v.get("accomplishment"), Some(true));
        assert_eq!(v.get("notes"), Some(false));
        assert_eq!(v.get("customer"), Some(false));
        assert_eq!(v.checks().len(), 4);
        assert!(!v.is_valid());
    }

    #[test]
    fn camel_case_keys_are_split() {
        let v = parse_verdict(r#"{"CustomerName": true, "ALL": true, "impact": true}"#).unwrap();
        assert_eq!(v.get("customer name"), Some(true));
        assert_eq!(v.get("all"), Some(true));
        assert_eq!(ValidationVerdict::label("customer name"), "Customer name");
    }

    #[test]
    fn malformed_blocks() {
        assert!(matches!(parse_verdict("{\"impact\": "), Err(BlockError::Syntax(_))));
        assert_eq!(parse_verdict("just words"), Err(BlockError::NotAMapping));
        assert_eq!(parse_verdict("{}"), Err(BlockError::Empty));
    }

    #[test]
    fn rephrase_strips_language_tag() {
        assert_eq!(parse_rephrase("text\nWe shipped it.\n"), Some("We shipped it.".into()));
        assert_eq!(parse_rephrase("Markdown\nWe shipped it."), Some("We shipped it.".into()));
        assert_eq!(parse_rephrase("We shipped\nit."), Some("We shipped\nit.".into()));
        assert_eq!(parse_rephrase("rephrased content"), Some("rephrased content".into()));
        assert_eq!(parse_rephrase(" \n "), None);
    }
}
