//! Best-effort parsing of a JSON object that is still streaming in.
//!
//! A truncated document is completed by closing an open string and every
//! open array/object. If that still does not parse (for example the cut fell
//! inside a key), the text is cut back to the last element boundary and
//! closed again.

use serde_json::Value;

/// Candidates tried before giving up on one attempt.
const MAX_CUTS: usize = 32;

/// Drop any text before the first `{`, collapse line breaks to spaces, trim.
pub fn clean_json_string(raw: &str) -> String {
    let body = raw.find('{').map_or(raw, |i| &raw[i..]);
    let mut out = String::with_capacity(body.len());
    let mut in_break = false;
    for c in body.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                out.push(' ');
            }
            in_break = true;
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out.trim().to_owned()
}

/// Byte offset where the text may be cut, with the closers needed at that point.
struct CutPoint {
    at: usize,
    open: Vec<u8>,
}

struct Scan {
    cuts: Vec<CutPoint>,
    open: Vec<u8>,
    in_string: bool,
    /// Input ends right after a backslash inside a string.
    dangling_escape: bool,
}

fn scan(text: &str) -> Scan {
    let mut cuts = Vec::new();
    let mut open: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                open.push(b);
                cuts.push(CutPoint { at: i + 1, open: open.clone() });
            }
            b'}' | b']' => {
                open.pop();
            }
            b',' => cuts.push(CutPoint { at: i, open: open.clone() }),
            _ => {}
        }
    }
    Scan { cuts, open, in_string, dangling_escape: in_string && escaped }
}

fn close(prefix: &str, open: &[u8]) -> String {
    let mut s = prefix.trim_end().to_owned();
    // a dangling separator or key/value colon cannot be closed directly
    while s.ends_with(',') || s.ends_with(':') {
        s.pop();
        s.truncate(s.trim_end().len());
    }
    for b in open.iter().rev() {
        s.push(if *b == b'{' { '}' } else { ']' });
    }
    s
}

/// Parse `text` as JSON, completing it if it is truncated.
pub fn parse_partial(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let scan = scan(text);

    let mut whole = text.to_owned();
    if scan.in_string {
        if scan.dangling_escape {
            whole.pop();
        }
        whole.push('"');
    }
    if let Ok(v) = serde_json::from_str(&close(&whole, &scan.open)) {
        return Some(v);
    }

    scan.cuts
        .iter()
        .rev()
        .take(MAX_CUTS)
        .find_map(|cut| serde_json::from_str(&close(&text[..cut.at], &cut.open)).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_strips_preamble_and_breaks() {
        assert_eq!(clean_json_string("Sure!\n{\"a\":\r\n1}\n"), "{\"a\": 1}");
        assert_eq!(clean_json_string("  no json "), "no json");
    }

    #[test]
    fn complete_document_parses_directly() {
        assert_eq!(parse_partial(r#"{"a":[1,2]}"#), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn open_string_is_kept() {
        assert_eq!(
            parse_partial(r#"{"preamble": "These subm"#),
            Some(json!({"preamble": "These subm"}))
        );
    }

    #[test]
    fn open_array_is_closed() {
        assert_eq!(
            parse_partial(r#"{"submission_nos": [3, 1,"#),
            Some(json!({"submission_nos": [3, 1]}))
        );
    }

    #[test]
    fn cut_inside_key_falls_back_to_last_element() {
        assert_eq!(
            parse_partial(r#"{"submission_nos": [3, 1], "pream"#),
            Some(json!({"submission_nos": [3, 1]}))
        );
        assert_eq!(
            parse_partial(r#"{"submission_nos": [3, 1], "preamble":"#),
            Some(json!({"submission_nos": [3, 1]}))
        );
    }

    #[test]
    fn dangling_escape() {
        assert_eq!(parse_partial(r#"{"a": "x\"#), Some(json!({"a": "x"})));
    }

    #[test]
    fn opening_brace_only() {
        assert_eq!(parse_partial("{"), Some(json!({})));
        assert_eq!(parse_partial(""), None);
    }
}
