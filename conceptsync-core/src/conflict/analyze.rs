//! Structural diff of two document snapshots.
//!
//! The analyzer is pure: it never touches storage, clocks or randomness, so
//! the same pair of snapshots always produces the same, stably ordered
//! output. Metadata diffs follow field order; node and prompt conflicts are
//! ordered by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Document, DocumentMetadata, Node, Prompt};

/// How a value differs between the local and remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    /// Present remotely, absent (or empty) locally.
    Added,
    /// Present on both sides with different values.
    Modified,
    /// Present locally, absent (or empty) remotely.
    Deleted,
}

impl std::fmt::Display for DiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffKind::Added => write!(f, "added"),
            DiffKind::Modified => write!(f, "modified"),
            DiffKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// Resolution paths used in diffs and resolution maps.
pub mod paths {
    pub const ACTIVE_PROMPT: &str = "prompts.active_prompt_id";

    pub fn metadata(field: &str) -> String {
        format!("metadata.{}", field)
    }

    pub fn node(id: &str) -> String {
        format!("nodes.{}", id)
    }

    pub fn node_field(id: &str, field: &str) -> String {
        format!("nodes.{}.{}", id, field)
    }

    pub fn prompt(id: &str) -> String {
        format!("prompts.{}", id)
    }

    pub fn prompt_field(id: &str, field: &str) -> String {
        format!("prompts.{}.{}", id, field)
    }
}

/// One differing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDiff {
    pub field: String,
    pub path: String,
    pub local_value: Value,
    pub remote_value: Value,
    pub kind: DiffKind,
}

/// Tracked metadata fields, in diff order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Name,
    Description,
    Category,
    Tags,
    Author,
    License,
    Visibility,
}

impl MetadataField {
    pub const ALL: [MetadataField; 7] = [
        MetadataField::Name,
        MetadataField::Description,
        MetadataField::Category,
        MetadataField::Tags,
        MetadataField::Author,
        MetadataField::License,
        MetadataField::Visibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Name => "name",
            MetadataField::Description => "description",
            MetadataField::Category => "category",
            MetadataField::Tags => "tags",
            MetadataField::Author => "author",
            MetadataField::License => "license",
            MetadataField::Visibility => "visibility",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let field = path.strip_prefix("metadata.")?;
        Self::ALL.into_iter().find(|f| f.as_str() == field)
    }

    pub fn value(&self, metadata: &DocumentMetadata) -> Value {
        match self {
            MetadataField::Name => Value::String(metadata.name.clone()),
            MetadataField::Description => Value::String(metadata.description.clone()),
            MetadataField::Category => Value::String(metadata.category.clone()),
            MetadataField::Tags => Value::Array(
                metadata
                    .tags
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect(),
            ),
            MetadataField::Author => Value::String(metadata.author.clone()),
            MetadataField::License => Value::String(metadata.license.clone()),
            MetadataField::Visibility => Value::String(metadata.visibility.to_string()),
        }
    }

    /// Copies this field from `source` into `target`.
    pub fn copy(&self, source: &DocumentMetadata, target: &mut DocumentMetadata) {
        match self {
            MetadataField::Name => target.name = source.name.clone(),
            MetadataField::Description => target.description = source.description.clone(),
            MetadataField::Category => target.category = source.category.clone(),
            MetadataField::Tags => target.tags = source.tags.clone(),
            MetadataField::Author => target.author = source.author.clone(),
            MetadataField::License => target.license = source.license.clone(),
            MetadataField::Visibility => target.visibility = source.visibility,
        }
    }

    /// Writes a caller-supplied JSON value into this field.
    pub fn apply(
        &self,
        value: Value,
        target: &mut DocumentMetadata,
    ) -> Result<(), serde_json::Error> {
        match self {
            MetadataField::Name => target.name = serde_json::from_value(value)?,
            MetadataField::Description => target.description = serde_json::from_value(value)?,
            MetadataField::Category => target.category = serde_json::from_value(value)?,
            MetadataField::Tags => target.tags = serde_json::from_value(value)?,
            MetadataField::Author => target.author = serde_json::from_value(value)?,
            MetadataField::License => target.license = serde_json::from_value(value)?,
            MetadataField::Visibility => target.visibility = serde_json::from_value(value)?,
        }
        Ok(())
    }
}

/// A node that differs between the two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConflict {
    pub node_id: String,
    pub path: String,
    pub kind: DiffKind,
    pub local: Option<Node>,
    pub remote: Option<Node>,
    pub diffs: Vec<ConflictDiff>,
}

/// A prompt record that differs between the two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConflict {
    pub prompt_id: String,
    pub path: String,
    pub kind: DiffKind,
    pub local: Option<Prompt>,
    pub remote: Option<Prompt>,
    pub diffs: Vec<ConflictDiff>,
}

/// Per-category counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub metadata: usize,
    pub nodes_added: usize,
    pub nodes_modified: usize,
    pub nodes_deleted: usize,
    pub prompts: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.metadata + self.nodes_added + self.nodes_modified + self.nodes_deleted + self.prompts
    }
}

/// Full diff between a local and a remote snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub metadata: Vec<ConflictDiff>,
    pub nodes: Vec<NodeConflict>,
    pub active_prompt: Option<ConflictDiff>,
    pub prompts: Vec<PromptConflict>,
    pub summary: DiffSummary,
}

impl ConflictAnalysis {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
            && self.nodes.is_empty()
            && self.active_prompt.is_none()
            && self.prompts.is_empty()
    }

    /// Every resolvable path, in analysis order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.metadata.iter().map(|d| d.path.clone()).collect();
        paths.extend(self.nodes.iter().map(|n| n.path.clone()));
        paths.extend(self.active_prompt.iter().map(|d| d.path.clone()));
        paths.extend(self.prompts.iter().map(|p| p.path.clone()));
        paths
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn classify(local: &Value, remote: &Value) -> DiffKind {
    if is_empty_value(local) {
        DiffKind::Added
    } else if is_empty_value(remote) {
        DiffKind::Deleted
    } else {
        DiffKind::Modified
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn option_value(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

/// Compares two snapshots.
pub fn analyze(local: &Document, remote: &Document) -> ConflictAnalysis {
    let metadata = diff_metadata(&local.metadata, &remote.metadata);
    let nodes = diff_nodes(&local.nodes, &remote.nodes);

    let local_active = local.prompts.active_prompt_id.as_deref();
    let remote_active = remote.prompts.active_prompt_id.as_deref();
    let active_prompt = (local_active != remote_active).then(|| {
        let local_value = option_value(local_active);
        let remote_value = option_value(remote_active);
        ConflictDiff {
            field: "active_prompt_id".to_string(),
            path: paths::ACTIVE_PROMPT.to_string(),
            kind: classify(&local_value, &remote_value),
            local_value,
            remote_value,
        }
    });
    let prompts = diff_prompts(&local.prompts.prompts, &remote.prompts.prompts);

    let count = |kind: DiffKind| nodes.iter().filter(|n| n.kind == kind).count();
    let summary = DiffSummary {
        metadata: metadata.len(),
        nodes_added: count(DiffKind::Added),
        nodes_modified: count(DiffKind::Modified),
        nodes_deleted: count(DiffKind::Deleted),
        prompts: prompts.len() + usize::from(active_prompt.is_some()),
    };

    ConflictAnalysis {
        metadata,
        nodes,
        active_prompt,
        prompts,
        summary,
    }
}

fn diff_metadata(local: &DocumentMetadata, remote: &DocumentMetadata) -> Vec<ConflictDiff> {
    MetadataField::ALL
        .into_iter()
        .filter_map(|field| {
            let local_value = field.value(local);
            let remote_value = field.value(remote);
            (local_value != remote_value).then(|| ConflictDiff {
                field: field.as_str().to_string(),
                path: paths::metadata(field.as_str()),
                kind: classify(&local_value, &remote_value),
                local_value,
                remote_value,
            })
        })
        .collect()
}

fn node_field_diffs(local: &Node, remote: &Node) -> Vec<ConflictDiff> {
    let fields: [(&str, Value, Value); 3] = [
        (
            "name",
            Value::String(local.name.clone()),
            Value::String(remote.name.clone()),
        ),
        (
            "description",
            Value::String(local.description.clone()),
            Value::String(remote.description.clone()),
        ),
        (
            "parent_id",
            option_value(local.parent_id.as_deref()),
            option_value(remote.parent_id.as_deref()),
        ),
    ];

    fields
        .into_iter()
        .filter(|(_, l, r)| l != r)
        .map(|(field, local_value, remote_value)| ConflictDiff {
            field: field.to_string(),
            path: paths::node_field(&local.id, field),
            kind: classify(&local_value, &remote_value),
            local_value,
            remote_value,
        })
        .collect()
}

fn prompt_field_diffs(local: &Prompt, remote: &Prompt) -> Vec<ConflictDiff> {
    let fields: [(&str, &String, &String); 2] = [
        ("name", &local.name, &remote.name),
        ("content", &local.content, &remote.content),
    ];

    fields
        .into_iter()
        .filter(|(_, l, r)| l != r)
        .map(|(field, l, r)| {
            let local_value = Value::String(l.clone());
            let remote_value = Value::String(r.clone());
            ConflictDiff {
                field: field.to_string(),
                path: paths::prompt_field(&local.id, field),
                kind: classify(&local_value, &remote_value),
                local_value,
                remote_value,
            }
        })
        .collect()
}

/// Shared id-indexed comparison for nodes and prompts.
///
/// Returns `(id, kind, local, remote)` for every id present on either side
/// whose records differ, ordered by id.
fn diff_by_id<'a, T: PartialEq>(
    local: &'a [T],
    remote: &'a [T],
    id_of: impl Fn(&T) -> &str,
) -> Vec<(String, DiffKind, Option<&'a T>, Option<&'a T>)> {
    let local_by_id: BTreeMap<&str, &T> = local.iter().map(|item| (id_of(item), item)).collect();
    let remote_by_id: BTreeMap<&str, &T> =
        remote.iter().map(|item| (id_of(item), item)).collect();
    let ids: BTreeSet<&str> = local_by_id.keys().chain(remote_by_id.keys()).copied().collect();

    ids.into_iter()
        .filter_map(|id| {
            let l = local_by_id.get(id).copied();
            let r = remote_by_id.get(id).copied();
            let kind = match (l, r) {
                (None, Some(_)) => DiffKind::Added,
                (Some(_), None) => DiffKind::Deleted,
                (Some(a), Some(b)) if a != b => DiffKind::Modified,
                _ => return None,
            };
            Some((id.to_string(), kind, l, r))
        })
        .collect()
}

fn diff_nodes(local: &[Node], remote: &[Node]) -> Vec<NodeConflict> {
    diff_by_id(local, remote, |n| n.id.as_str())
        .into_iter()
        .map(|(id, kind, l, r)| {
            let path = paths::node(&id);
            let diffs = match (l, r) {
                (Some(a), Some(b)) => node_field_diffs(a, b),
                _ => vec![ConflictDiff {
                    field: "node".to_string(),
                    path: path.clone(),
                    local_value: l.map_or(Value::Null, to_value),
                    remote_value: r.map_or(Value::Null, to_value),
                    kind,
                }],
            };
            NodeConflict {
                node_id: id,
                path,
                kind,
                local: l.cloned(),
                remote: r.cloned(),
                diffs,
            }
        })
        .collect()
}

fn diff_prompts(local: &[Prompt], remote: &[Prompt]) -> Vec<PromptConflict> {
    diff_by_id(local, remote, |p| p.id.as_str())
        .into_iter()
        .map(|(id, kind, l, r)| {
            let path = paths::prompt(&id);
            let diffs = match (l, r) {
                (Some(a), Some(b)) => prompt_field_diffs(a, b),
                _ => vec![ConflictDiff {
                    field: "prompt".to_string(),
                    path: path.clone(),
                    local_value: l.map_or(Value::Null, to_value),
                    remote_value: r.map_or(Value::Null, to_value),
                    kind,
                }],
            };
            PromptConflict {
                prompt_id: id,
                path,
                kind,
                local: l.cloned(),
                remote: r.cloned(),
                diffs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_id::DocumentId;
    use crate::models::{PromptCollection, Visibility};
    use serde_json::json;

    fn doc(version: u64, nodes: Vec<Node>) -> Document {
        Document::with_id(DocumentId::parse("doc1").unwrap(), "Map")
            .with_version(version)
            .with_nodes(nodes)
    }

    #[test]
    fn test_identical_documents_have_no_diffs() {
        let mut a = doc(3, vec![Node::with_id("n1", "Root"), Node::with_id("n2", "Child").with_parent("n1")]);
        a.metadata.tags = vec!["science".to_string()];
        a.prompts = PromptCollection {
            prompts: vec![Prompt::with_id("p1", "Explain", "Explain")],
            active_prompt_id: Some("p1".to_string()),
        };

        let analysis = analyze(&a, &a.clone());
        assert!(analysis.is_empty());
        assert_eq!(analysis.summary.total(), 0);
        assert!(analysis.paths().is_empty());
    }

    #[test]
    fn test_modified_and_added_nodes() {
        let local = doc(3, vec![Node::with_id("n1", "Old")]);
        let remote = doc(4, vec![Node::with_id("n1", "New"), Node::with_id("n2", "Extra")]);

        let analysis = analyze(&local, &remote);
        assert_eq!(analysis.nodes.len(), 2);

        let n1 = &analysis.nodes[0];
        assert_eq!(n1.node_id, "n1");
        assert_eq!(n1.kind, DiffKind::Modified);
        assert_eq!(n1.diffs.len(), 1);
        assert_eq!(n1.diffs[0].field, "name");
        assert_eq!(n1.diffs[0].path, "nodes.n1.name");
        assert_eq!(n1.diffs[0].local_value, json!("Old"));
        assert_eq!(n1.diffs[0].remote_value, json!("New"));

        let n2 = &analysis.nodes[1];
        assert_eq!(n2.node_id, "n2");
        assert_eq!(n2.kind, DiffKind::Added);
        assert!(n2.local.is_none());

        assert_eq!(analysis.summary.nodes_added, 1);
        assert_eq!(analysis.summary.nodes_modified, 1);
    }

    #[test]
    fn test_local_only_node_is_deleted() {
        let local = doc(2, vec![Node::with_id("n1", "Root"), Node::with_id("n9", "Mine")]);
        let remote = doc(2, vec![Node::with_id("n1", "Root")]);

        let analysis = analyze(&local, &remote);
        assert_eq!(analysis.nodes.len(), 1);
        assert_eq!(analysis.nodes[0].kind, DiffKind::Deleted);
        assert_eq!(analysis.nodes[0].path, "nodes.n9");
        assert_eq!(analysis.summary.nodes_deleted, 1);
    }

    #[test]
    fn test_node_diff_per_field() {
        let local = doc(
            1,
            vec![
                Node::with_id("a", "A"),
                Node::with_id("b", "B"),
                Node::with_id("n", "Name").with_description("one"),
            ],
        );
        let remote = doc(
            1,
            vec![
                Node::with_id("a", "A"),
                Node::with_id("b", "B"),
                Node::with_id("n", "Renamed").with_description("two").with_parent("a"),
            ],
        );

        let analysis = analyze(&local, &remote);
        let fields: Vec<&str> = analysis.nodes[0].diffs.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "description", "parent_id"]);
        assert_eq!(analysis.nodes[0].diffs[2].kind, DiffKind::Added);
    }

    #[test]
    fn test_metadata_classification() {
        let mut local = doc(1, vec![]);
        let mut remote = doc(1, vec![]);
        local.metadata.description = String::new();
        remote.metadata.description = "A map of physics".to_string();
        local.metadata.author = "ada".to_string();
        remote.metadata.author = String::new();
        local.metadata.license = "MIT".to_string();
        remote.metadata.license = "CC-BY".to_string();
        remote.metadata.visibility = Visibility::Public;

        let analysis = analyze(&local, &remote);
        let kinds: Vec<(&str, DiffKind)> = analysis
            .metadata
            .iter()
            .map(|d| (d.field.as_str(), d.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("description", DiffKind::Added),
                ("author", DiffKind::Deleted),
                ("license", DiffKind::Modified),
                ("visibility", DiffKind::Modified),
            ]
        );
        assert_eq!(analysis.summary.metadata, 4);
    }

    #[test]
    fn test_tags_compared_structurally() {
        let mut local = doc(1, vec![]);
        let mut remote = doc(1, vec![]);
        local.metadata.tags = vec!["a".to_string(), "b".to_string()];
        remote.metadata.tags = vec!["a".to_string(), "b".to_string()];
        assert!(analyze(&local, &remote).metadata.is_empty());

        remote.metadata.tags.push("c".to_string());
        let analysis = analyze(&local, &remote);
        assert_eq!(analysis.metadata[0].path, "metadata.tags");
        assert_eq!(analysis.metadata[0].remote_value, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_prompt_diffs() {
        let mut local = doc(1, vec![]);
        let mut remote = doc(1, vec![]);
        local.prompts = PromptCollection {
            prompts: vec![
                Prompt::with_id("p1", "Explain", "v1"),
                Prompt::with_id("p2", "Quiz", "quiz"),
            ],
            active_prompt_id: Some("p1".to_string()),
        };
        remote.prompts = PromptCollection {
            prompts: vec![
                Prompt::with_id("p1", "Explain", "v2"),
                Prompt::with_id("p3", "Outline", "outline"),
            ],
            active_prompt_id: Some("p3".to_string()),
        };

        let analysis = analyze(&local, &remote);
        let active = analysis.active_prompt.as_ref().unwrap();
        assert_eq!(active.kind, DiffKind::Modified);
        assert_eq!(active.remote_value, json!("p3"));

        let kinds: Vec<(&str, DiffKind)> = analysis
            .prompts
            .iter()
            .map(|p| (p.prompt_id.as_str(), p.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("p1", DiffKind::Modified),
                ("p2", DiffKind::Deleted),
                ("p3", DiffKind::Added),
            ]
        );
        assert_eq!(analysis.prompts[0].diffs[0].field, "content");
        assert_eq!(analysis.summary.prompts, 4);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let local = doc(1, vec![Node::with_id("z", "Z"), Node::with_id("a", "A")]);
        let remote = doc(2, vec![Node::with_id("m", "M"), Node::with_id("a", "A2")]);

        let first = serde_json::to_string(&analyze(&local, &remote)).unwrap();
        let second = serde_json::to_string(&analyze(&local, &remote)).unwrap();
        assert_eq!(first, second);

        let ids: Vec<String> = analyze(&local, &remote)
            .nodes
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_metadata_field_from_path() {
        assert_eq!(
            MetadataField::from_path("metadata.tags"),
            Some(MetadataField::Tags)
        );
        assert_eq!(MetadataField::from_path("metadata.unknown"), None);
        assert_eq!(MetadataField::from_path("nodes.n1"), None);
    }
}
