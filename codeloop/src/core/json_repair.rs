//! Defensive extraction of a JSON object from model output.

use serde_json::Value;

/// Parse the first JSON object in `text`.
///
/// Tries the raw text, then the text with code fences stripped, then the first
/// balanced `{...}` block. Returns `None` if nothing parses to an object.
pub fn extract_object(text: &str) -> Option<Value> {
    let candidates = [
        Some(text.trim().to_string()),
        Some(strip_code_fences(text)),
        first_object_block(text).map(str::to_string),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|candidate| serde_json::from_str::<Value>(&candidate).ok())
        .find(Value::is_object)
}

/// Remove `null` members from every object so optional fields fall back to
/// their defaults when deserialized.
pub fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, member| !member.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First balanced `{...}` span, skipping braces inside string literals.
fn first_object_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        assert_eq!(extract_object(r#"{"a":1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn strips_fences() {
        let text = "```json\n{\"steps\": []}\n```";
        assert_eq!(extract_object(text), Some(json!({"steps": []})));
    }

    #[test]
    fn extracts_first_block_from_prose() {
        let text = "Here is the plan:\n{\"goal\": \"fix {braces} in \\\"strings\\\"\", \"steps\": []}\nThanks!";
        let value = extract_object(text).expect("object");
        assert_eq!(value["goal"], "fix {braces} in \"strings\"");
    }

    #[test]
    fn drops_nested_nulls() {
        let mut value = json!({"goal": null, "steps": [{"path": null, "action": "fs.read"}]});
        drop_nulls(&mut value);
        assert_eq!(value, json!({"steps": [{"action": "fs.read"}]}));
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert_eq!(extract_object("[1, 2, 3]"), None);
        assert_eq!(extract_object("no json here"), None);
        assert_eq!(extract_object("{\"unterminated\": "), None);
    }
}
