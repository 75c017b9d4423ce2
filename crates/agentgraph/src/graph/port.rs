//! Ports and output value resolution

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output key (and port name) carrying a component failure
pub const ERROR_PORT: &str = "_error";

/// Composite output key whose fields feed identically named ports
pub const DEFAULT_OUTPUT: &str = "default";

/// A resolved port on a component instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub index: usize,
    pub default: Option<Value>,
    pub optional: bool,
    pub expression: Option<String>,
}

impl Port {
    /// A port is required when it is neither optional nor defaulted
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }

    pub fn is_error_port(&self) -> bool {
        self.name == ERROR_PORT
    }
}

/// Look up a dotted path (`a.b.0.c`) in a JSON value.
///
/// Object segments are keys, array segments are indices. Empty segments are
/// skipped, so `""` returns the value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Resolve the value a component output delivers through one output port.
///
/// In order: the port's dotted expression, the key named like the port, the
/// same key inside a `default` composite object. Non-object outputs are
/// delivered whole; `null` delivers nothing.
pub fn resolve_output(output: &Value, port: &Port) -> Option<Value> {
    if let Some(expression) = &port.expression {
        return lookup_path(output, expression).cloned();
    }

    match output {
        Value::Null => None,
        Value::Object(map) => map.get(&port.name).cloned().or_else(|| {
            map.get(DEFAULT_OUTPUT)
                .and_then(|composite| composite.get(&port.name))
                .cloned()
        }),
        other => Some(other.clone()),
    }
}

/// The `_error` payload of an output, if any
pub fn error_of(output: &Value) -> Option<&Value> {
    output.get(ERROR_PORT)
}

/// Merge values that arrived on one input port in the same batch.
///
/// A single value stays scalar; several become an array in arrival order.
pub fn merge_port_values(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.pop().unwrap_or(Value::Null)
    } else {
        Value::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn port(name: &str) -> Port {
        Port {
            name: name.to_string(),
            index: 0,
            default: None,
            optional: false,
            expression: None,
        }
    }

    #[test]
    fn test_lookup_path() {
        let value = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup_path(&value, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup_path(&value, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup_path(&value, "a.x"), None);
        assert_eq!(lookup_path(&value, "a.b.9"), None);
        assert_eq!(lookup_path(&value, ""), Some(&value));
    }

    #[test]
    fn test_resolve_named_output() {
        let output = json!({"answer": 42, "other": 1});
        assert_eq!(resolve_output(&output, &port("answer")), Some(json!(42)));
        assert_eq!(resolve_output(&output, &port("missing")), None);
    }

    #[test]
    fn test_resolve_default_composite() {
        let output = json!({"default": {"x": 1, "y": 2}});
        assert_eq!(resolve_output(&output, &port("y")), Some(json!(2)));
    }

    #[test]
    fn test_named_key_wins_over_composite() {
        let output = json!({"x": "direct", "default": {"x": "nested"}});
        assert_eq!(resolve_output(&output, &port("x")), Some(json!("direct")));
    }

    #[test]
    fn test_resolve_expression() {
        let mut p = port("title");
        p.expression = Some("doc.meta.title".into());
        let output = json!({"doc": {"meta": {"title": "hello"}}});
        assert_eq!(resolve_output(&output, &p), Some(json!("hello")));
    }

    #[test]
    fn test_scalar_and_null_outputs() {
        assert_eq!(resolve_output(&json!(5), &port("any")), Some(json!(5)));
        assert_eq!(resolve_output(&Value::Null, &port("any")), None);
    }

    #[test]
    fn test_merge_port_values() {
        assert_eq!(merge_port_values(vec![json!(5)]), json!(5));
        assert_eq!(merge_port_values(vec![json!(5), json!(7)]), json!([5, 7]));
    }

    #[test]
    fn test_required_port() {
        let mut p = port("a");
        assert!(p.is_required());
        p.default = Some(json!(1));
        assert!(!p.is_required());
        p.default = None;
        p.optional = true;
        assert!(!p.is_required());
    }

    #[test]
    fn test_error_of() {
        assert!(error_of(&json!({"_error": {"message": "boom"}})).is_some());
        assert!(error_of(&json!({"ok": true})).is_none());
        assert!(error_of(&json!(3)).is_none());
    }
}
