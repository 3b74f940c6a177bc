use clap::{Args, Subcommand, ValueEnum};
use std::io::{self, Write};
use uuid::Uuid;

use conceptsync_core::conflict::ConflictDiff;
use conceptsync_core::{Conflict, Resolution, ResolutionMap, ResolutionStrategy, SyncOrchestrator};

use super::OutputFormat;

#[derive(Clone, ValueEnum)]
pub enum StrategyArg {
    /// Keep local values everywhere
    Local,
    /// Take remote values everywhere
    Remote,
    /// Remote edits win, local deletions and prompt settings are kept
    Auto,
    /// Only the --set choices apply; everything else stays local
    Custom,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Local => ResolutionStrategy::KeepLocal,
            StrategyArg::Remote => ResolutionStrategy::KeepRemote,
            StrategyArg::Auto => ResolutionStrategy::Auto,
            StrategyArg::Custom => ResolutionStrategy::Custom,
        }
    }
}

#[derive(Args)]
pub struct ConflictCommand {
    #[command(subcommand)]
    pub command: ConflictSubcommand,
}

#[derive(Subcommand)]
pub enum ConflictSubcommand {
    /// List pending conflicts
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the differences behind a conflict
    Show {
        /// Conflict ID (or a unique prefix)
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Merge a conflict and queue the result
    Resolve {
        /// Conflict ID (or a unique prefix)
        id: String,

        /// Resolution strategy
        #[arg(long, short, value_enum, default_value = "auto")]
        strategy: StrategyArg,

        /// Per-path choice: PATH=local, PATH=remote or PATH=<json value>
        /// (can be repeated)
        #[arg(long = "set", value_name = "PATH=CHOICE")]
        set: Vec<String>,
    },

    /// Discard all pending conflicts without merging
    Clear {
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl ConflictCommand {
    pub fn run(&self, engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConflictSubcommand::List { format } => {
                let infos: Vec<_> = engine.conflicts().iter().map(Conflict::info).collect();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&infos)?);
                    }
                    OutputFormat::Text => {
                        if infos.is_empty() {
                            println!("No conflicts.");
                            return Ok(());
                        }
                        for info in &infos {
                            println!("{}  {}", info.id, info.document_id);
                            println!("  {}", info.description);
                            println!(
                                "  local:  {} (v{}, {})",
                                info.local_summary,
                                info.local_version,
                                info.local_timestamp.format("%Y-%m-%d %H:%M:%S")
                            );
                            println!(
                                "  remote: {} (v{}, {})",
                                info.remote_summary,
                                info.remote_version,
                                info.remote_timestamp.format("%Y-%m-%d %H:%M:%S")
                            );
                            println!("  differences: {}", info.diff.total());
                        }
                    }
                }
                Ok(())
            }

            ConflictSubcommand::Show { id, format } => {
                let conflict = find_conflict(engine, id)?;
                let analysis = conflict.analyze();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&analysis)?);
                    }
                    OutputFormat::Text => {
                        println!("Conflict {}", conflict.id);
                        println!("{}", "=".repeat(9 + conflict.id.to_string().len()));
                        println!("{}", conflict.description);
                        println!();

                        for diff in &analysis.metadata {
                            print_diff(diff);
                        }
                        for node in &analysis.nodes {
                            println!("{} [{}]", node.path, node.kind);
                            for diff in &node.diffs {
                                print_diff(diff);
                            }
                        }
                        if let Some(diff) = &analysis.active_prompt {
                            print_diff(diff);
                        }
                        for prompt in &analysis.prompts {
                            println!("{} [{}]", prompt.path, prompt.kind);
                            for diff in &prompt.diffs {
                                print_diff(diff);
                            }
                        }
                        println!();
                        println!("Resolvable paths: {}", analysis.paths().join(", "));
                    }
                }
                Ok(())
            }

            ConflictSubcommand::Resolve { id, strategy, set } => {
                let conflict = find_conflict(engine, id)?;
                let overrides = parse_overrides(set)?;
                let overrides = (!overrides.is_empty()).then_some(&overrides);

                let merged = engine.resolve_conflict(
                    conflict.id,
                    ResolutionStrategy::from(strategy.clone()),
                    overrides,
                )?;
                println!(
                    "Resolved conflict for '{}': merged version v{} queued for sync.",
                    merged.metadata.name, merged.version
                );
                Ok(())
            }

            ConflictSubcommand::Clear { force } => {
                let count = engine.conflicts().len();
                if count == 0 {
                    println!("No conflicts.");
                    return Ok(());
                }
                if !force {
                    print!(
                        "Discard {} conflict(s)? The remote copies stay as they are. [y/N] ",
                        count
                    );
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }
                let cleared = engine.clear_all_conflicts()?;
                println!("Cleared {} conflict(s).", cleared);
                Ok(())
            }
        }
    }
}

fn print_diff(diff: &ConflictDiff) {
    println!(
        "  {} [{}]: {} -> {}",
        diff.path, diff.kind, diff.local_value, diff.remote_value
    );
}

/// Finds a conflict by full id or unique id prefix.
fn find_conflict(engine: &SyncOrchestrator, id: &str) -> Result<Conflict, String> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return engine
            .conflict(uuid)
            .ok_or_else(|| format!("Conflict not found: {}", id));
    }

    let mut matches: Vec<Conflict> = engine
        .conflicts()
        .into_iter()
        .filter(|c| c.id.to_string().starts_with(id))
        .collect();
    match matches.len() {
        0 => Err(format!("Conflict not found: {}", id)),
        1 => Ok(matches.remove(0)),
        n => Err(format!("Conflict id '{}' is ambiguous ({} matches)", id, n)),
    }
}

/// Parses `PATH=local`, `PATH=remote` or `PATH=<json>`; a value that is not
/// valid JSON is taken as a string.
fn parse_override(entry: &str) -> Result<(String, Resolution), String> {
    let (path, choice) = entry
        .split_once('=')
        .ok_or_else(|| format!("Expected PATH=CHOICE, got '{}'", entry))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(format!("Missing path in '{}'", entry));
    }

    let resolution = match choice.trim() {
        "local" => Resolution::Local,
        "remote" => Resolution::Remote,
        value => Resolution::Custom(
            serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string())),
        ),
    };
    Ok((path.to_string(), resolution))
}

fn parse_overrides(entries: &[String]) -> Result<ResolutionMap, String> {
    entries.iter().map(|e| parse_override(e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_override_choices() {
        assert_eq!(
            parse_override("metadata.name=remote").unwrap(),
            ("metadata.name".to_string(), Resolution::Remote)
        );
        assert_eq!(
            parse_override("nodes.n1 = local").unwrap(),
            ("nodes.n1".to_string(), Resolution::Local)
        );
    }

    #[test]
    fn test_parse_override_custom_values() {
        assert_eq!(
            parse_override("metadata.tags=[\"a\",\"b\"]").unwrap().1,
            Resolution::Custom(json!(["a", "b"]))
        );
        assert_eq!(
            parse_override("metadata.name=Both sides").unwrap().1,
            Resolution::Custom(json!("Both sides"))
        );
        assert_eq!(
            parse_override("nodes.n2=null").unwrap().1,
            Resolution::Custom(serde_json::Value::Null)
        );
    }

    #[test]
    fn test_parse_override_errors() {
        assert!(parse_override("no-separator").is_err());
        assert!(parse_override("=remote").is_err());
    }

    #[test]
    fn test_parse_overrides_collects_map() {
        let map = parse_overrides(&[
            "metadata.name=remote".to_string(),
            "nodes.n1=local".to_string(),
        ])
        .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("nodes.n1"), Some(&Resolution::Local));
    }
}
