use serde_json::Value;

/// Deserialize a stored `description` property. The store has no array
/// properties, so lists are persisted as JSON strings; plain strings from
/// older writes are wrapped as a single-element list.
pub fn parse_description_field(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => flatten_items(&items),
            _ => {
                if s.is_empty() {
                    Vec::new()
                } else {
                    vec![s.clone()]
                }
            }
        },
        Value::Array(items) => flatten_items(items),
        other => vec![other.to_string()],
    }
}

fn flatten_items(items: &[Value]) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::String(s) => out.push(s.clone()),
            Value::Array(inner) => out.extend(flatten_items(inner)),
            Value::Null => {}
            other => out.push(other.to_string()),
        }
    }
    out
}

/// Append `new` to `existing`, deduplicating while preserving first-seen
/// order. Empty fragments are dropped.
pub fn merge_descriptions(existing: &[String], new: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for desc in existing.iter().chain(new.iter()) {
        let desc = desc.trim();
        if desc.is_empty() {
            continue;
        }
        if seen.insert(desc.to_string()) {
            merged.push(desc.to_string());
        }
    }
    merged
}

/// Serialize a description list for storage.
pub fn encode_descriptions(descriptions: &[String]) -> String {
    serde_json::to_string(descriptions).unwrap_or_else(|_| "[]".to_string())
}

/// Canonical orientation for an endpoint pair: smaller name first. Dedup by
/// unordered pair reduces to dedup by this ordered key.
pub fn order_pair<'a, T>(
    name_a: &'a str,
    extra_a: T,
    name_b: &'a str,
    extra_b: T,
) -> (&'a str, T, &'a str, T) {
    if name_a <= name_b {
        (name_a, extra_a, name_b, extra_b)
    } else {
        (name_b, extra_b, name_a, extra_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_preserves_order_and_dedups() {
        let existing = vec!["played Eames".to_string()];
        let new = vec![
            "forger in dream team".to_string(),
            "played Eames".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(
            merge_descriptions(&existing, &new),
            vec!["played Eames".to_string(), "forger in dream team".to_string()]
        );
    }

    #[test]
    fn parse_handles_json_string_plain_string_and_array() {
        assert_eq!(
            parse_description_field(&json!("[\"a\",\"b\"]")),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            parse_description_field(&json!("plain text")),
            vec!["plain text".to_string()]
        );
        assert_eq!(
            parse_description_field(&json!(["a", ["b", "c"]])),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_description_field(&Value::Null).is_empty());
    }

    #[test]
    fn round_trip_through_encoding() {
        let descs = vec!["spouse".to_string(), "appears in dream".to_string()];
        let encoded = encode_descriptions(&descs);
        assert_eq!(parse_description_field(&json!(encoded)), descs);
    }

    #[test]
    fn pair_ordering_is_symmetric() {
        let a = order_pair("Mal", "L1", "Cobb", "L2");
        let b = order_pair("Cobb", "L2", "Mal", "L1");
        assert_eq!(a, b);
        assert_eq!(a.0, "Cobb");
    }
}
