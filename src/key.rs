//! Cache key derivation and normalization
//!
//! Identical logical requests must map to identical keys. Keys are built from
//! canonical JSON (object keys sorted at every depth), so field order in the
//! caller's data never changes the key. On disk a key is addressed by the
//! SHA-256 of its text, which keeps arbitrary query text safe as a file name.

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize a value to JSON with object keys sorted recursively
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(value))?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Key for a mapped context under the query-and-scope policy
pub fn context_key(query: &str, scope: &str) -> Result<String> {
    canonical_json(&serde_json::json!({
        "query": query,
        "agentType": scope,
    }))
}

/// Key for a mapped context covering the whole request shape
pub fn context_key_full<P: Serialize, C: Serialize>(
    query: &str,
    scope: &str,
    current_context: &Value,
    persona: &P,
    capabilities: &[C],
) -> Result<String> {
    canonical_json(&serde_json::json!({
        "query": query,
        "agentType": scope,
        "currentContext": current_context,
        "persona": serde_json::to_value(persona)?,
        "capabilities": serde_json::to_value(capabilities)?,
    }))
}

/// Key for a `(session, agent, scope)` memory record.
///
/// Each part is escaped so a `:` inside one part cannot be confused with the
/// separator.
pub fn composite_key(session_id: &str, agent_id: &str, scope: &str) -> String {
    format!(
        "{}:{}:{}",
        escape_part(session_id),
        escape_part(agent_id),
        escape_part(scope)
    )
}

fn escape_part(part: &str) -> String {
    part.replace('\\', "\\\\").replace(':', "\\:")
}

/// File stem used for a key in the durable store
pub fn file_stem(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

/// Builder for readable, deterministic cache keys
///
/// Produces `namespace:identifier?a=1&b=2` with parameters sorted by name.
#[derive(Debug, Clone)]
pub struct MemoryKeyBuilder {
    namespace: String,
    identifier: String,
    params: Vec<(String, String)>,
}

impl MemoryKeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn build(mut self) -> String {
        let mut key = format!("{}:{}", self.namespace, self.identifier);

        if !self.params.is_empty() {
            self.params.sort();
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": [ {"d": 1, "c": 2} ]}});
        let out = canonical_json(&a).unwrap();
        assert_eq!(out, r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#);
    }

    #[test]
    fn test_context_key_is_stable() {
        let k1 = context_key("q1", "testAgent").unwrap();
        let k2 = context_key("q1", "testAgent").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1, r#"{"agentType":"testAgent","query":"q1"}"#);

        assert_ne!(k1, context_key("q1", "otherAgent").unwrap());
        assert_ne!(k1, context_key("q2", "testAgent").unwrap());
    }

    #[test]
    fn test_context_key_full_ignores_field_order() {
        let ctx_a = json!({"mood": "calm", "page": "home"});
        let ctx_b: Value = serde_json::from_str(r#"{"page":"home","mood":"calm"}"#).unwrap();
        let persona = json!({"name": "guide"});
        let caps = vec!["search".to_string()];

        let k1 = context_key_full("q", "s", &ctx_a, &persona, &caps).unwrap();
        let k2 = context_key_full("q", "s", &ctx_b, &persona, &caps).unwrap();
        assert_eq!(k1, k2);

        let other = json!({"page": "settings"});
        assert_ne!(k1, context_key_full("q", "s", &other, &persona, &caps).unwrap());
    }

    #[test]
    fn test_composite_key_escapes_separator() {
        assert_eq!(composite_key("s1", "a1", "scope1"), "s1:a1:scope1");
        assert_ne!(
            composite_key("s:1", "a", "b"),
            composite_key("s", "1:a", "b")
        );
    }

    #[test]
    fn test_file_stem_is_hex_sha256() {
        let stem = file_stem(r#"{"query":"a/b"}"#);
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(stem, file_stem(r#"{"query":"a/b"}"#));
    }

    #[test]
    fn test_key_builder_sorts_params() {
        let key = MemoryKeyBuilder::new("context")
            .identifier("release-plan")
            .param("scope", "marketing")
            .param("lang", "en")
            .build();
        assert_eq!(key, "context:release-plan?lang=en&scope=marketing");

        let bare = MemoryKeyBuilder::new("context").identifier("x").build();
        assert_eq!(bare, "context:x");
    }
}
