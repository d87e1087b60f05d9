//! Context objects assembled for agents

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptive data about the agent persona. Carries no behavior.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    pub fn with_traits(mut self, traits: Vec<String>) -> Self {
        self.traits = traits;
        self
    }
}

/// Opaque fragment returned by a semantic search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: String,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl MemoryFragment {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Persona, capabilities, request context and retrieved knowledge for one query.
///
/// Fields are read-only once built; the cached copy is the unit stored per
/// `(query, scope)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextObject {
    persona: Persona,
    knowledge: Vec<MemoryFragment>,
    current_context: Value,
    capabilities: Vec<String>,
}

impl ContextObject {
    /// Structural merge; fragment content is passed through untouched
    pub fn new(
        knowledge: Vec<MemoryFragment>,
        current_context: Value,
        persona: Persona,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            persona,
            knowledge,
            current_context,
            capabilities,
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Fragments in the order the search backend ranked them
    pub fn knowledge(&self) -> &[MemoryFragment] {
        &self.knowledge
    }

    pub fn current_context(&self) -> &Value {
        &self.current_context
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_object_json_shape() {
        let ctx = ContextObject::new(
            vec![MemoryFragment::new("mem1", "Relevant memory 1")],
            json!({"some": "context"}),
            Persona::new("testPersona"),
            vec!["cap1".to_string()],
        );

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            value,
            json!({
                "persona": {"name": "testPersona"},
                "knowledge": [{"id": "mem1", "content": "Relevant memory 1"}],
                "currentContext": {"some": "context"},
                "capabilities": ["cap1"]
            })
        );

        let back: ContextObject = serde_json::from_value(value).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn test_fragment_order_preserved() {
        let fragments = vec![
            MemoryFragment::new("b", "second").with_score(0.4),
            MemoryFragment::new("a", "first").with_score(0.9),
        ];
        let ctx = ContextObject::new(fragments.clone(), Value::Null, Persona::default(), vec![]);
        assert_eq!(ctx.knowledge(), fragments.as_slice());
    }

    #[test]
    fn test_persona_builder() {
        let persona = Persona::new("guide")
            .with_role("advisor")
            .with_tone("warm")
            .with_traits(vec!["patient".to_string()]);
        assert_eq!(persona.role.as_deref(), Some("advisor"));
        assert_eq!(persona.traits, vec!["patient".to_string()]);
    }

    #[test]
    fn test_has_capability() {
        let ctx = ContextObject::new(
            vec![],
            Value::Null,
            Persona::default(),
            vec!["schedule".to_string()],
        );
        assert!(ctx.has_capability("schedule"));
        assert!(!ctx.has_capability("publish"));
    }
}
