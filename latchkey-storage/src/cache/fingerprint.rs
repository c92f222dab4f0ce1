//! Filter fingerprints and cache key layout.
//!
//! A fingerprint is the SHA-256 of a filter's canonical JSON form, where
//! every object has its keys sorted. Filters that differ only in key
//! insertion order share a fingerprint.
//!
//! Key layout under a prefix `p` and dataset `d`:
//!
//! ```text
//! p:d:version                                      version counter
//! p:d:filter:<fp>:limit:<l>:offset:<o>             page key
//! p:d:filter:<fp>:limit:<l>:offset:<o>:version:<n> versioned entry
//! ```
//!
//! Dataset names may not contain `:`, so a dataset segment never spans into
//! another dataset's keys.

use latchkey_core::PolicyError;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Write `value` as compact JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Canonical JSON text of a filter. `null` canonicalizes to `{}`.
pub fn canonical_filter(filter: &Value) -> Result<String, PolicyError> {
    match filter {
        Value::Null => Ok("{}".to_string()),
        Value::Object(_) => {
            let mut out = String::new();
            write_canonical(filter, &mut out);
            Ok(out)
        }
        other => Err(PolicyError::InvalidArgument {
            field: "filter".to_string(),
            reason: format!("must be a JSON object, got {}", json_kind(other)),
        }),
    }
}

pub fn filter_fingerprint(filter: &Value) -> Result<String, PolicyError> {
    let canonical = canonical_filter(filter)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// KEY LAYOUT
// ============================================================================

/// Reject dataset names that are empty or contain the `:` separator.
pub fn check_dataset(dataset: &str) -> Result<(), PolicyError> {
    if dataset.is_empty() {
        return Err(PolicyError::InvalidArgument {
            field: "dataset".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if dataset.contains(':') {
        return Err(PolicyError::InvalidArgument {
            field: "dataset".to_string(),
            reason: format!("{:?} must not contain ':'", dataset),
        });
    }
    Ok(())
}

pub fn version_key(prefix: &str, dataset: &str) -> String {
    format!("{}:{}:version", prefix, dataset)
}

/// Page key for `(dataset, filter, limit, offset)`. Pure.
pub fn cache_key_for(
    prefix: &str,
    dataset: &str,
    filter: &Value,
    limit: u64,
    offset: u64,
) -> Result<String, PolicyError> {
    check_dataset(dataset)?;
    let fingerprint = filter_fingerprint(filter)?;
    Ok(format!(
        "{}:{}:filter:{}:limit:{}:offset:{}",
        prefix, dataset, fingerprint, limit, offset
    ))
}

pub fn versioned_key(page_key: &str, version: i64) -> String {
    format!("{}:version:{}", page_key, version)
}

/// Glob matching every page entry of a dataset but not its version
/// counter. Glob metacharacters in the prefix and dataset name are escaped.
pub fn dataset_pages_pattern(prefix: &str, dataset: &str) -> String {
    format!("{}:{}:filter:*", escape_glob(prefix), escape_glob(dataset))
}

fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let filter = json!({"b": {"z": 1, "a": [ {"y": true, "x": null} ]}, "a": "s"});
        assert_eq!(
            canonical_filter(&filter).unwrap(),
            r#"{"a":"s","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn test_null_and_empty_filters_agree() {
        assert_eq!(
            filter_fingerprint(&Value::Null).unwrap(),
            filter_fingerprint(&json!({})).unwrap()
        );
    }

    #[test]
    fn test_non_object_filter_rejected() {
        assert!(matches!(
            filter_fingerprint(&json!([1, 2])),
            Err(PolicyError::InvalidArgument { .. })
        ));
        assert!(filter_fingerprint(&json!("status=open")).is_err());
    }

    #[test]
    fn test_key_layout() {
        let key = cache_key_for("paginated-cache", "orders", &json!({"status": "open"}), 10, 20)
            .unwrap();
        assert!(key.starts_with("paginated-cache:orders:filter:"));
        assert!(key.ends_with(":limit:10:offset:20"));
        assert_eq!(versioned_key(&key, 3), format!("{}:version:3", key));
        assert_eq!(version_key("paginated-cache", "orders"), "paginated-cache:orders:version");
        assert_eq!(dataset_pages_pattern("p", "a*b"), "p:a\\*b:filter:*");
    }

    #[test]
    fn test_dataset_names_cannot_carry_separator() {
        assert!(check_dataset("orders").is_ok());
        assert!(matches!(
            check_dataset("orders:archived"),
            Err(PolicyError::InvalidArgument { .. })
        ));
        assert!(check_dataset("").is_err());
        assert!(cache_key_for("p", "orders:archived", &Value::Null, 10, 0).is_err());
    }

    #[test]
    fn test_different_limits_yield_different_keys() {
        let a = cache_key_for("p", "d", &Value::Null, 10, 0).unwrap();
        let b = cache_key_for("p", "d", &Value::Null, 20, 0).unwrap();
        let c = cache_key_for("p", "d", &Value::Null, 10, 10).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    fn build(pairs: &[(String, i64)]) -> Value {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.clone(), json!({ "value": v, "tags": [k] }));
        }
        Value::Object(map)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_fingerprint_ignores_insertion_order(
            pairs in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Vec<(String, i64)> = pairs.clone().into_iter().collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let f1 = build(&forward);
            let f2 = build(&reversed);
            prop_assert_eq!(
                cache_key_for("p", "d", &f1, 10, 0).unwrap(),
                cache_key_for("p", "d", &f2, 10, 0).unwrap()
            );
        }

        #[test]
        fn prop_fingerprint_separates_values(key in "[a-z]{1,8}", a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let f1 = build(&[(key.clone(), a)]);
            let f2 = build(&[(key, b)]);
            prop_assert_ne!(filter_fingerprint(&f1).unwrap(), filter_fingerprint(&f2).unwrap());
        }
    }
}
