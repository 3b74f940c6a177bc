use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored prompt template attached to a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
}

impl Prompt {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, content)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Ordered prompts plus the currently selected one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PromptCollection {
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub active_prompt_id: Option<String>,
}

impl PromptCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Returns the active prompt, if one is selected and still present.
    pub fn active(&self) -> Option<&Prompt> {
        self.active_prompt_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
