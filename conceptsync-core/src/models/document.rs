use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use super::node::Node;
use super::prompt::{Prompt, PromptCollection};
use crate::document_id::DocumentId;

/// Who can see a published document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Unlisted => write!(f, "unlisted"),
            Visibility::Public => write!(f, "public"),
        }
    }
}

/// Descriptive fields shown alongside a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DocumentMetadata {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author: String,
    pub license: String,
    pub visibility: Visibility,
}

/// Location of the remote copy of a document.
///
/// Both fields are required, so a document is either fully linked or not
/// linked at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteLink {
    pub remote_id: String,
    pub remote_url: String,
}

impl RemoteLink {
    pub fn new(remote_id: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            remote_url: remote_url.into(),
        }
    }
}

/// Structural problems that prevent a document from being committed or
/// queued for sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Node has an empty id")]
    EmptyNodeId,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node '{node_id}' references missing parent '{parent_id}'")]
    DanglingParent { node_id: String, parent_id: String },

    #[error("Parent cycle detected at node '{0}'")]
    Cycle(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate prompt id: {0}")]
    DuplicatePrompt(String),

    #[error("Active prompt '{0}' is not in the prompt collection")]
    DanglingActivePrompt(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),
}

/// The versioned aggregate that gets synchronized: a concept forest plus
/// metadata and prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub prompts: PromptCollection,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteLink>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(DocumentId::new(), name)
    }

    pub fn with_id(id: DocumentId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            metadata: DocumentMetadata {
                name: name.into(),
                ..DocumentMetadata::default()
            },
            nodes: Vec::new(),
            prompts: PromptCollection::default(),
            version: 1,
            created_at: now,
            last_modified: now,
            remote: None,
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptCollection) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_remote(mut self, remote: RemoteLink) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn children<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.parent_id.as_deref() == Some(parent_id))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    /// Checks the forest invariant and prompt references.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut parents: HashMap<&str, Option<&str>> = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(ValidationError::EmptyNodeId);
            }
            if parents
                .insert(node.id.as_str(), node.parent_id.as_deref())
                .is_some()
            {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }

        for node in &self.nodes {
            if let Some(parent_id) = node.parent_id.as_deref() {
                if !parents.contains_key(parent_id) {
                    return Err(ValidationError::DanglingParent {
                        node_id: node.id.clone(),
                        parent_id: parent_id.to_string(),
                    });
                }
            }
        }

        // Revisiting an id while walking up a parent chain means a cycle.
        for node in &self.nodes {
            let mut seen = HashSet::new();
            let mut current = Some(node.id.as_str());
            while let Some(id) = current {
                if !seen.insert(id) {
                    return Err(ValidationError::Cycle(node.id.clone()));
                }
                current = parents.get(id).copied().flatten();
            }
        }

        let mut prompt_ids = HashSet::new();
        for prompt in &self.prompts.prompts {
            if !prompt_ids.insert(prompt.id.as_str()) {
                return Err(ValidationError::DuplicatePrompt(prompt.id.clone()));
            }
        }
        if let Some(active) = self.prompts.active_prompt_id.as_deref() {
            if !prompt_ids.contains(active) {
                return Err(ValidationError::DanglingActivePrompt(active.to_string()));
            }
        }

        Ok(())
    }

    /// Records a committed mutation: bumps the version and the modification
    /// timestamp (never moving it backwards).
    pub fn touch(&mut self) {
        self.version += 1;
        let now = Utc::now();
        if now > self.last_modified {
            self.last_modified = now;
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.metadata.name = name.into();
        self.touch();
    }

    pub fn update_metadata(&mut self, f: impl FnOnce(&mut DocumentMetadata)) {
        f(&mut self.metadata);
        self.touch();
    }

    /// Adds a node. The parent, if any, must already exist.
    pub fn add_node(&mut self, node: Node) -> Result<(), ValidationError> {
        if node.id.is_empty() {
            return Err(ValidationError::EmptyNodeId);
        }
        if self.node(&node.id).is_some() {
            return Err(ValidationError::DuplicateNode(node.id));
        }
        if let Some(parent_id) = node.parent_id.as_deref() {
            if self.node(parent_id).is_none() {
                return Err(ValidationError::DanglingParent {
                    node_id: node.id.clone(),
                    parent_id: parent_id.to_string(),
                });
            }
        }
        self.nodes.push(node);
        self.touch();
        Ok(())
    }

    /// Replaces a node with an edited copy. The edit is rejected, and the
    /// document left untouched, if it would break the forest invariant.
    pub fn update_node(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Node),
    ) -> Result<(), ValidationError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| ValidationError::NodeNotFound(id.to_string()))?;

        let previous = self.nodes[index].clone();
        f(&mut self.nodes[index]);
        self.nodes[index].id = previous.id.clone();

        if let Err(e) = self.validate() {
            self.nodes[index] = previous;
            return Err(e);
        }
        self.touch();
        Ok(())
    }

    /// Removes a node together with all of its descendants.
    ///
    /// Returns the removed nodes in document order.
    pub fn remove_node(&mut self, id: &str) -> Result<Vec<Node>, ValidationError> {
        if self.node(id).is_none() {
            return Err(ValidationError::NodeNotFound(id.to_string()));
        }

        let mut doomed: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let before = doomed.len();
            for node in &self.nodes {
                if let Some(parent_id) = &node.parent_id {
                    if doomed.contains(parent_id) {
                        doomed.insert(node.id.clone());
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }

        let (removed, kept): (Vec<Node>, Vec<Node>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(|n| doomed.contains(&n.id));
        self.nodes = kept;
        self.touch();
        Ok(removed)
    }

    pub fn add_prompt(&mut self, prompt: Prompt) -> Result<(), ValidationError> {
        if self.prompts.contains(&prompt.id) {
            return Err(ValidationError::DuplicatePrompt(prompt.id));
        }
        self.prompts.prompts.push(prompt);
        self.touch();
        Ok(())
    }

    /// Removes a prompt, clearing the active selection if it pointed at it.
    pub fn remove_prompt(&mut self, id: &str) -> Result<Prompt, ValidationError> {
        let index = self
            .prompts
            .prompts
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ValidationError::PromptNotFound(id.to_string()))?;
        let prompt = self.prompts.prompts.remove(index);
        if self.prompts.active_prompt_id.as_deref() == Some(id) {
            self.prompts.active_prompt_id = None;
        }
        self.touch();
        Ok(prompt)
    }

    pub fn set_active_prompt(&mut self, id: Option<&str>) -> Result<(), ValidationError> {
        if let Some(id) = id {
            if !self.prompts.contains(id) {
                return Err(ValidationError::PromptNotFound(id.to_string()));
            }
        }
        self.prompts.active_prompt_id = id.map(str::to_string);
        self.touch();
        Ok(())
    }

    fn fmt_subtree(&self, f: &mut fmt::Formatter<'_>, node: &Node, depth: usize) -> fmt::Result {
        writeln!(f, "{}- {}", "  ".repeat(depth), node)?;
        for child in self.children(&node.id) {
            self.fmt_subtree(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("{} (v{})", self.metadata.name, self.version);
        writeln!(f, "{}", title)?;
        writeln!(f, "{}", "=".repeat(title.len()))?;

        if !self.metadata.description.is_empty() {
            writeln!(f, "{}", self.metadata.description)?;
        }
        if !self.metadata.category.is_empty() {
            writeln!(f, "Category: {}", self.metadata.category)?;
        }
        if !self.metadata.tags.is_empty() {
            writeln!(f, "Tags: {}", self.metadata.tags.join(", "))?;
        }
        writeln!(f, "Visibility: {}", self.metadata.visibility)?;
        if let Some(remote) = &self.remote {
            writeln!(f, "Remote: {} ({})", remote.remote_id, remote.remote_url)?;
        }

        if !self.nodes.is_empty() {
            writeln!(f, "\nConcepts:")?;
            for root in self.roots() {
                self.fmt_subtree(f, root, 1)?;
            }
        }

        if !self.prompts.is_empty() {
            writeln!(f, "\nPrompts:")?;
            for prompt in &self.prompts.prompts {
                let marker = if self.prompts.active_prompt_id.as_deref() == Some(prompt.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                writeln!(f, "  {} {}", marker, prompt.name)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::with_id(DocumentId::parse("doc1").unwrap(), "Physics").with_nodes(vec![
            Node::with_id("n1", "Mechanics"),
            Node::with_id("n2", "Kinematics").with_parent("n1"),
            Node::with_id("n3", "Dynamics").with_parent("n1"),
            Node::with_id("n4", "Velocity").with_parent("n2"),
        ])
    }

    #[test]
    fn test_new_document_starts_at_version_one() {
        let doc = Document::new("Empty");
        assert_eq!(doc.version, 1);
        assert_eq!(doc.metadata.name, "Empty");
        assert!(doc.remote.is_none());
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_children_of_owned_parent_id() {
        let document = sample();
        let parent = String::from("n1");
        let names: Vec<&str> = document
            .children(&parent)
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["Kinematics", "Dynamics"]);
        assert_eq!(document.children("n4").count(), 0);
    }

    #[test]
    fn test_validate_rejects_dangling_parent() {
        let doc = Document::new("Bad").with_nodes(vec![Node::with_id("n1", "A").with_parent("gone")]);
        assert_eq!(
            doc.validate(),
            Err(ValidationError::DanglingParent {
                node_id: "n1".to_string(),
                parent_id: "gone".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let doc = Document::new("Bad")
            .with_nodes(vec![Node::with_id("n1", "A"), Node::with_id("n1", "B")]);
        assert_eq!(
            doc.validate(),
            Err(ValidationError::DuplicateNode("n1".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let doc = Document::new("Bad").with_nodes(vec![
            Node::with_id("a", "A").with_parent("b"),
            Node::with_id("b", "B").with_parent("a"),
        ]);
        assert!(matches!(doc.validate(), Err(ValidationError::Cycle(_))));

        let self_loop = Document::new("Bad").with_nodes(vec![Node::with_id("a", "A").with_parent("a")]);
        assert!(matches!(self_loop.validate(), Err(ValidationError::Cycle(_))));
    }

    #[test]
    fn test_validate_rejects_dangling_active_prompt() {
        let mut doc = Document::new("Prompts");
        doc.prompts.active_prompt_id = Some("p9".to_string());
        assert_eq!(
            doc.validate(),
            Err(ValidationError::DanglingActivePrompt("p9".to_string()))
        );
    }

    #[test]
    fn test_mutations_bump_version() {
        let mut doc = sample();
        let start = doc.version;

        doc.rename("Classical Physics");
        assert_eq!(doc.version, start + 1);

        doc.add_node(Node::with_id("n5", "Energy").with_parent("n3"))
            .unwrap();
        assert_eq!(doc.version, start + 2);
        assert!(doc.last_modified >= doc.created_at);
    }

    #[test]
    fn test_add_node_rejects_missing_parent() {
        let mut doc = sample();
        let version = doc.version;
        let result = doc.add_node(Node::with_id("n9", "Orphan").with_parent("nope"));
        assert!(matches!(result, Err(ValidationError::DanglingParent { .. })));
        assert_eq!(doc.version, version);
    }

    #[test]
    fn test_update_node_rolls_back_on_cycle() {
        let mut doc = sample();
        let version = doc.version;
        let result = doc.update_node("n1", |n| n.parent_id = Some("n4".to_string()));
        assert!(matches!(result, Err(ValidationError::Cycle(_))));
        assert!(doc.node("n1").unwrap().is_root());
        assert_eq!(doc.version, version);

        doc.update_node("n4", |n| n.name = "Speed".to_string()).unwrap();
        assert_eq!(doc.node("n4").unwrap().name, "Speed");
        assert_eq!(doc.version, version + 1);
    }

    #[test]
    fn test_remove_node_removes_subtree() {
        let mut doc = sample();
        let removed = doc.remove_node("n2").unwrap();
        let removed_ids: Vec<&str> = removed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(removed_ids, vec!["n2", "n4"]);
        assert_eq!(doc.nodes.len(), 2);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_remove_prompt_clears_active() {
        let mut doc = Document::new("Prompts");
        doc.add_prompt(Prompt::with_id("p1", "Explain", "Explain it")).unwrap();
        doc.set_active_prompt(Some("p1")).unwrap();
        assert_eq!(doc.prompts.active_prompt_id.as_deref(), Some("p1"));

        doc.remove_prompt("p1").unwrap();
        assert!(doc.prompts.active_prompt_id.is_none());
        assert!(doc.set_active_prompt(Some("p1")).is_err());
    }

    #[test]
    fn test_document_display_renders_tree() {
        let doc = sample();
        let output = doc.to_string();
        assert!(output.contains("Physics (v1)"));
        assert!(output.contains("  - Mechanics"));
        assert!(output.contains("    - Kinematics"));
        assert!(output.contains("      - Velocity"));
    }

    #[test]
    fn test_document_json_roundtrip() {
        let doc = sample().with_remote(RemoteLink::new("r1", "file:///remote/r1.json"));
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
    }
}
