//! Conflict detection and resolution.
//!
//! A [`Conflict`] is raised when the remote store rejects an update because
//! its copy has moved past the version the local edit was based on. It pairs
//! both snapshots; [`analyze`] diffs them and [`merge`] turns a resolution
//! map into a single document that can be pushed again.

mod analyze;
mod merge;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document_id::DocumentId;
use crate::models::{Document, RemoteLink};

pub use analyze::{
    analyze, paths, ConflictAnalysis, ConflictDiff, DiffKind, DiffSummary, MetadataField,
    NodeConflict, PromptConflict,
};
pub use merge::{auto_resolutions, merge, uniform_resolutions, MergeError, Resolution, ResolutionMap};

/// How a caller wants a conflict settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Every differing path keeps the local value.
    KeepLocal,
    /// Every differing path takes the remote value.
    KeepRemote,
    /// The built-in heuristic (see [`auto_resolutions`]).
    Auto,
    /// Only the caller's explicit resolutions apply; everything else stays
    /// local.
    Custom,
}

impl ResolutionStrategy {
    /// Builds the resolution map for an analysis. Explicit `overrides` win
    /// over the strategy's choice for the same path.
    pub fn resolutions(
        &self,
        analysis: &ConflictAnalysis,
        overrides: Option<&ResolutionMap>,
    ) -> ResolutionMap {
        let mut map = match self {
            ResolutionStrategy::KeepLocal => uniform_resolutions(analysis, Resolution::Local),
            ResolutionStrategy::KeepRemote => uniform_resolutions(analysis, Resolution::Remote),
            ResolutionStrategy::Auto => auto_resolutions(analysis),
            ResolutionStrategy::Custom => ResolutionMap::new(),
        };
        if let Some(overrides) = overrides {
            map.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        map
    }
}

/// A detected divergence between the local and remote copy of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub local: Document,
    pub remote: Document,
    pub remote_link: RemoteLink,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(local: Document, remote: Document, remote_link: RemoteLink, base_version: u64) -> Self {
        let description = format!(
            "Remote copy of '{}' moved from version {} to {} while local edits were pending (local version {})",
            local.metadata.name, base_version, remote.version, local.version
        );
        Self {
            id: Uuid::new_v4(),
            document_id: local.id.clone(),
            local,
            remote,
            remote_link,
            description,
            detected_at: Utc::now(),
        }
    }

    pub fn local_version(&self) -> u64 {
        self.local.version
    }

    pub fn remote_version(&self) -> u64 {
        self.remote.version
    }

    pub fn analyze(&self) -> ConflictAnalysis {
        analyze(&self.local, &self.remote)
    }

    /// Merges both snapshots with the given resolutions.
    pub fn merge(&self, resolutions: &ResolutionMap) -> Result<Document, MergeError> {
        merge(&self.local, &self.remote, &self.analyze(), resolutions)
    }

    /// Status-friendly summary of this conflict.
    pub fn info(&self) -> ConflictInfo {
        ConflictInfo {
            id: self.id,
            document_id: self.document_id.clone(),
            local_summary: summarize(&self.local),
            remote_summary: summarize(&self.remote),
            local_version: self.local.version,
            remote_version: self.remote.version,
            local_timestamp: self.local.last_modified,
            remote_timestamp: self.remote.last_modified,
            description: self.description.clone(),
            diff: self.analyze().summary,
        }
    }
}

fn summarize(doc: &Document) -> String {
    format!(
        "{}: {} node{}, {} prompt{}",
        doc.metadata.name,
        doc.nodes.len(),
        if doc.nodes.len() == 1 { "" } else { "s" },
        doc.prompts.len(),
        if doc.prompts.len() == 1 { "" } else { "s" },
    )
}

/// Conflict entry exposed through the sync status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub local_summary: String,
    pub remote_summary: String,
    pub local_version: u64,
    pub remote_version: u64,
    pub local_timestamp: DateTime<Utc>,
    pub remote_timestamp: DateTime<Utc>,
    pub description: String,
    pub diff: DiffSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;

    fn conflict() -> Conflict {
        let id = DocumentId::parse("doc1").unwrap();
        let local = Document::with_id(id.clone(), "Physics")
            .with_version(3)
            .with_nodes(vec![Node::with_id("n1", "Old")]);
        let remote = Document::with_id(id, "Physics")
            .with_version(4)
            .with_nodes(vec![Node::with_id("n1", "New"), Node::with_id("n2", "Extra")]);
        Conflict::new(local, remote, RemoteLink::new("r1", "mem://r1"), 2)
    }

    #[test]
    fn test_conflict_info() {
        let conflict = conflict();
        let info = conflict.info();
        assert_eq!(info.local_version, 3);
        assert_eq!(info.remote_version, 4);
        assert_eq!(info.local_summary, "Physics: 1 node, 0 prompts");
        assert_eq!(info.remote_summary, "Physics: 2 nodes, 0 prompts");
        assert_eq!(info.diff.nodes_added, 1);
        assert_eq!(info.diff.nodes_modified, 1);
        assert!(info.description.contains("version 2 to 4"));
    }

    #[test]
    fn test_strategy_overrides() {
        let conflict = conflict();
        let analysis = conflict.analyze();

        let mut overrides = ResolutionMap::new();
        overrides.insert("nodes.n2".to_string(), Resolution::Local);
        let map = ResolutionStrategy::KeepRemote.resolutions(&analysis, Some(&overrides));
        assert_eq!(map.get("nodes.n1"), Some(&Resolution::Remote));
        assert_eq!(map.get("nodes.n2"), Some(&Resolution::Local));

        let custom = ResolutionStrategy::Custom.resolutions(&analysis, None);
        assert!(custom.is_empty());
    }

    #[test]
    fn test_auto_merge_scenario() {
        let conflict = conflict();
        let analysis = conflict.analyze();
        let map = ResolutionStrategy::Auto.resolutions(&analysis, None);
        let merged = conflict.merge(&map).unwrap();

        assert_eq!(merged.version, 5);
        assert_eq!(merged.node("n1").unwrap().name, "New");
        assert!(merged.node("n2").is_some());
    }
}
