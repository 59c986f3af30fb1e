//! Parameter substitution in resource configurations
//!
//! Resource configurations are opaque to the engine except for one
//! convention: string values may reference resolved stack parameters as
//! `${param.NAME}`. A string that is exactly one reference takes the
//! parameter's value with its type intact; references embedded in a
//! longer string are stringified in place. Unknown names are left
//! untouched for the adapter to interpret.

use std::collections::BTreeMap;

use serde_json::Value;

const OPEN: &str = "${param.";

pub fn interpolate(config: &Value, inputs: &BTreeMap<String, Value>) -> Value {
    match config {
        Value::String(s) => interpolate_string(s, inputs),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate(v, inputs)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(s: &str, inputs: &BTreeMap<String, Value>) -> Value {
    // Whole-string reference keeps the parameter's JSON type
    if let Some(name) = s
        .strip_prefix(OPEN)
        .and_then(|rest| rest.strip_suffix('}'))
    {
        if !name.contains('}') {
            if let Some(value) = inputs.get(name) {
                return value.clone();
            }
            return Value::String(s.to_string());
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match inputs.get(name) {
                    Some(Value::String(v)) => out.push_str(v),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push_str(OPEN);
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(OPEN);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("subnet_id".to_string(), json!("subnet-123")),
            ("port".to_string(), json!(5432)),
        ])
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let config = json!({"port": "${param.port}"});
        assert_eq!(
            interpolate(&config, &inputs()),
            json!({"port": 5432})
        );
    }

    #[test]
    fn test_embedded_reference_stringifies() {
        let config = json!({"endpoint": "db:${param.port}/main"});
        assert_eq!(
            interpolate(&config, &inputs()),
            json!({"endpoint": "db:5432/main"})
        );
    }

    #[test]
    fn test_nested_structures() {
        let config = json!({"subnets": ["${param.subnet_id}"], "tags": {"net": "${param.subnet_id}"}});
        assert_eq!(
            interpolate(&config, &inputs()),
            json!({"subnets": ["subnet-123"], "tags": {"net": "subnet-123"}})
        );
    }

    #[test]
    fn test_unknown_reference_left_untouched() {
        let config = json!("${param.unknown}");
        assert_eq!(interpolate(&config, &inputs()), json!("${param.unknown}"));
    }

    #[test]
    fn test_non_reference_values_pass_through() {
        let config = json!({"cidr": "10.0.0.0/16", "count": 2, "flag": true});
        assert_eq!(interpolate(&config, &inputs()), config);
    }
}
