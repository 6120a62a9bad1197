//! Balanced-delimiter JSON extraction from reasoning output.
//!
//! Decisive-pass output is rationale prose with a JSON object somewhere
//! inside it. Scanning starts at the first opening brace and tracks brace
//! depth, string state, and escapes until the object closes.

use crate::error::CompilerError;

/// Extract the first complete JSON object embedded in `text`.
///
/// Surrounding prose (before and after the object) is ignored. Fails with
/// [`CompilerError::NoJsonFound`] when no opening brace exists and
/// [`CompilerError::UnbalancedJson`] when the braces never balance or the
/// balanced span is not valid JSON.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value, CompilerError> {
    let start = text.find('{').ok_or(CompilerError::NoJsonFound)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate)
                        .map_err(|_| CompilerError::UnbalancedJson);
                }
            }
            _ => {}
        }
    }

    Err(CompilerError::UnbalancedJson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn extracts_bare_object() {
        let value = extract_json_object(r#"{"target": "veo"}"#).unwrap();
        assert_eq!(value["target"], "veo");
    }

    #[test]
    fn tolerates_surrounding_rationale() {
        let text = r#"I considered the options carefully.
            {"target": "imagen", "fields": {"prompt": "a fox"}}
            This is the best fit because the request asks for a still."#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["target"], "imagen");
        assert_eq!(value["fields"]["prompt"], "a fox");
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let text = r#"{"prompt": "draw {curly} braces } everywhere"}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["prompt"], "draw {curly} braces } everywhere");
    }

    #[test]
    fn escaped_quote_inside_string_handled() {
        let text = r#"{"prompt": "she said \"go\" and left"}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["prompt"], r#"she said "go" and left"#);
    }

    #[test]
    fn nested_objects_balance() {
        let text = r#"before {"a": {"b": {"c": 1}}} after"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["a"]["b"]["c"], 1);
    }

    #[test]
    fn no_brace_is_no_json_found() {
        assert_matches!(
            extract_json_object("no payload here"),
            Err(CompilerError::NoJsonFound)
        );
    }

    #[test]
    fn unclosed_object_is_unbalanced() {
        assert_matches!(
            extract_json_object(r#"{"target": "veo""#),
            Err(CompilerError::UnbalancedJson)
        );
    }

    #[test]
    fn balanced_but_invalid_json_is_unbalanced() {
        assert_matches!(
            extract_json_object("{'single': 'quotes'}"),
            Err(CompilerError::UnbalancedJson)
        );
    }

    #[test]
    fn only_the_first_object_is_returned() {
        let value = extract_json_object(r#"{"first": 1} {"second": 2}"#).unwrap();
        assert_eq!(value["first"], 1);
        assert!(value.get("second").is_none());
    }
}
