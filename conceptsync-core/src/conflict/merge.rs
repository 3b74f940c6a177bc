//! Applying resolutions to an analysis to produce a merged document.
//!
//! Merging works at whole-node (and whole-prompt) granularity: a node
//! resolved REMOTE is replaced by the remote node as a unit, fields are
//! never mixed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use super::analyze::{paths, ConflictAnalysis, DiffKind, MetadataField};
use crate::models::{Document, Node, Prompt, ValidationError};

/// Which side wins for one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Local,
    Remote,
    /// A caller-supplied replacement value. For node and prompt paths the
    /// value is a full record, or `null` to drop the record.
    Custom(Value),
}

/// Path → resolution. Paths missing from the map resolve to LOCAL.
pub type ResolutionMap = BTreeMap<String, Resolution>;

/// Errors that can occur while merging.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid custom value for '{path}': {source}")]
    InvalidCustomValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Merged document is invalid: {0}")]
    Validation(#[from] ValidationError),
}

/// Resolves every path in the analysis to the same side.
pub fn uniform_resolutions(analysis: &ConflictAnalysis, resolution: Resolution) -> ResolutionMap {
    analysis
        .paths()
        .into_iter()
        .map(|path| (path, resolution.clone()))
        .collect()
}

/// Resolutions used when no human is available to decide.
///
/// Descriptive metadata and edited or added nodes take the remote side;
/// locally present nodes missing remotely are kept, and prompt settings are
/// treated as a local preference.
pub fn auto_resolutions(analysis: &ConflictAnalysis) -> ResolutionMap {
    let mut map = ResolutionMap::new();

    for diff in &analysis.metadata {
        map.insert(diff.path.clone(), Resolution::Remote);
    }
    for node in &analysis.nodes {
        let resolution = match node.kind {
            DiffKind::Added | DiffKind::Modified => Resolution::Remote,
            DiffKind::Deleted => Resolution::Local,
        };
        map.insert(node.path.clone(), resolution);
    }
    if let Some(active) = &analysis.active_prompt {
        map.insert(active.path.clone(), Resolution::Local);
    }
    for prompt in &analysis.prompts {
        map.insert(prompt.path.clone(), Resolution::Local);
    }

    map
}

fn custom<T: serde::de::DeserializeOwned>(path: &str, value: &Value) -> Result<T, MergeError> {
    serde_json::from_value(value.clone()).map_err(|source| MergeError::InvalidCustomValue {
        path: path.to_string(),
        source,
    })
}

/// What to do with one keyed record after resolution.
enum RecordAction<T> {
    Keep,
    Upsert(T),
    Remove,
}

fn record_action<T: Clone + serde::de::DeserializeOwned>(
    path: &str,
    kind: DiffKind,
    remote: Option<&T>,
    resolution: Option<&Resolution>,
) -> Result<RecordAction<T>, MergeError> {
    Ok(match resolution {
        None | Some(Resolution::Local) => RecordAction::Keep,
        Some(Resolution::Remote) => match (kind, remote) {
            (DiffKind::Deleted, _) | (_, None) => RecordAction::Remove,
            (_, Some(record)) => RecordAction::Upsert(record.clone()),
        },
        Some(Resolution::Custom(Value::Null)) => RecordAction::Remove,
        Some(Resolution::Custom(value)) => RecordAction::Upsert(custom(path, value)?),
    })
}

fn apply_node(nodes: &mut Vec<Node>, id: &str, action: RecordAction<Node>) {
    match action {
        RecordAction::Keep => {}
        RecordAction::Remove => nodes.retain(|n| n.id != id),
        RecordAction::Upsert(mut node) => {
            node.id = id.to_string();
            match nodes.iter_mut().find(|n| n.id == id) {
                Some(existing) => *existing = node,
                None => nodes.push(node),
            }
        }
    }
}

fn apply_prompt(prompts: &mut Vec<Prompt>, id: &str, action: RecordAction<Prompt>) {
    match action {
        RecordAction::Keep => {}
        RecordAction::Remove => prompts.retain(|p| p.id != id),
        RecordAction::Upsert(mut prompt) => {
            prompt.id = id.to_string();
            match prompts.iter_mut().find(|p| p.id == id) {
                Some(existing) => *existing = prompt,
                None => prompts.push(prompt),
            }
        }
    }
}

/// Produces the merged document.
///
/// The local document is the base. The result's version is one past the
/// larger of the two input versions, and its modification time is the later
/// of the two, so the function is pure and re-running it with the same
/// inputs yields the same document.
pub fn merge(
    local: &Document,
    remote: &Document,
    analysis: &ConflictAnalysis,
    resolutions: &ResolutionMap,
) -> Result<Document, MergeError> {
    let mut merged = local.clone();
    merged.version = local.version.max(remote.version) + 1;
    merged.last_modified = local.last_modified.max(remote.last_modified);
    if merged.remote.is_none() {
        merged.remote = remote.remote.clone();
    }

    for diff in &analysis.metadata {
        let Some(field) = MetadataField::from_path(&diff.path) else {
            continue;
        };
        match resolutions.get(&diff.path) {
            Some(Resolution::Remote) => field.copy(&remote.metadata, &mut merged.metadata),
            Some(Resolution::Custom(value)) => field
                .apply(value.clone(), &mut merged.metadata)
                .map_err(|source| MergeError::InvalidCustomValue {
                    path: diff.path.clone(),
                    source,
                })?,
            None | Some(Resolution::Local) => {}
        }
    }

    for conflict in &analysis.nodes {
        let action = record_action(
            &conflict.path,
            conflict.kind,
            conflict.remote.as_ref(),
            resolutions.get(&conflict.path),
        )?;
        apply_node(&mut merged.nodes, &conflict.node_id, action);
    }

    if let Some(active) = &analysis.active_prompt {
        match resolutions.get(paths::ACTIVE_PROMPT) {
            Some(Resolution::Remote) => {
                merged.prompts.active_prompt_id = remote.prompts.active_prompt_id.clone();
            }
            Some(Resolution::Custom(value)) => {
                merged.prompts.active_prompt_id = custom(&active.path, value)?;
            }
            None | Some(Resolution::Local) => {}
        }
    }

    for conflict in &analysis.prompts {
        let action = record_action(
            &conflict.path,
            conflict.kind,
            conflict.remote.as_ref(),
            resolutions.get(&conflict.path),
        )?;
        apply_prompt(&mut merged.prompts.prompts, &conflict.prompt_id, action);
    }

    // A removed prompt cannot stay selected.
    if let Some(active) = merged.prompts.active_prompt_id.as_deref() {
        if !merged.prompts.contains(active) {
            merged.prompts.active_prompt_id = None;
        }
    }

    merged.validate()?;
    Ok(merged)
}
