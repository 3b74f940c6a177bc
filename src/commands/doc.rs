use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use conceptsync_core::{
    Document, DocumentId, DocumentMetadata, Node, OperationKind, Prompt, SyncOrchestrator,
    Visibility,
};

use super::OutputFormat;
use crate::remote::DirectoryRemoteStore;

#[derive(Clone, ValueEnum)]
pub enum VisibilityArg {
    Private,
    Unlisted,
    Public,
}

impl From<VisibilityArg> for Visibility {
    fn from(arg: VisibilityArg) -> Self {
        match arg {
            VisibilityArg::Private => Visibility::Private,
            VisibilityArg::Unlisted => Visibility::Unlisted,
            VisibilityArg::Public => Visibility::Public,
        }
    }
}

#[derive(Args)]
pub struct DocCommand {
    #[command(subcommand)]
    pub command: DocSubcommand,
}

#[derive(Subcommand)]
pub enum DocSubcommand {
    /// Create a new document
    New {
        /// Document name
        name: String,

        /// Explicit document ID (letters, digits, '-' and '_')
        #[arg(long)]
        id: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Category
        #[arg(long)]
        category: Option<String>,

        /// Tags (can be repeated)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        /// Author
        #[arg(long)]
        author: Option<String>,

        /// License
        #[arg(long)]
        license: Option<String>,

        /// Visibility
        #[arg(long, value_enum)]
        visibility: Option<VisibilityArg>,
    },

    /// List all local documents
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a document's details
    Show {
        /// Document ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Rename a document
    Rename {
        /// Document ID
        id: String,

        /// New name
        name: String,
    },

    /// Add a node to a document's concept tree
    AddNode {
        /// Document ID
        id: String,

        /// Node name
        name: String,

        /// Explicit node ID
        #[arg(long)]
        node_id: Option<String>,

        /// Parent node ID (omit for a root node)
        #[arg(long)]
        parent: Option<String>,

        /// Node description
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a node and its descendants
    RemoveNode {
        /// Document ID
        id: String,

        /// Node ID
        node_id: String,
    },

    /// Add a prompt to a document
    AddPrompt {
        /// Document ID
        id: String,

        /// Prompt name
        name: String,

        /// Prompt text
        content: String,

        /// Make this the active prompt
        #[arg(long)]
        active: bool,
    },

    /// Import a document from a JSON file
    Import {
        /// Path to the JSON file
        path: PathBuf,
    },

    /// Compare a document with its remote copy
    Refresh {
        /// Document ID
        id: String,
    },
}

impl DocCommand {
    pub async fn run(
        &self,
        engine: &SyncOrchestrator,
        remote: &DirectoryRemoteStore,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            DocSubcommand::New {
                name,
                id,
                description,
                category,
                tags,
                author,
                license,
                visibility,
            } => {
                let id = match id {
                    Some(id) => DocumentId::parse(id)?,
                    None => DocumentId::new(),
                };
                let metadata = DocumentMetadata {
                    name: name.clone(),
                    description: description.clone().unwrap_or_default(),
                    category: category.clone().unwrap_or_default(),
                    tags: tags.clone(),
                    author: author.clone().unwrap_or_default(),
                    license: license.clone().unwrap_or_default(),
                    visibility: visibility.clone().map(Visibility::from).unwrap_or_default(),
                };
                if engine.document(&id)?.is_some() {
                    return Err(format!("Document already exists: {}", id).into());
                }

                let doc = Document::with_id(id, name.clone()).with_metadata(metadata);
                let doc_id = doc.id.clone();
                engine.enqueue_sync(OperationKind::Create, doc, None)?;
                println!("Created document: {} ({})", name, doc_id);
                Ok(())
            }

            DocSubcommand::List { format } => {
                let mut docs = Vec::new();
                for id in engine.documents()? {
                    if let Some(doc) = engine.document(&id)? {
                        docs.push(doc);
                    }
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&docs)?);
                    }
                    OutputFormat::Text => {
                        if docs.is_empty() {
                            println!("No documents found.");
                            return Ok(());
                        }
                        for doc in &docs {
                            let linked = if doc.remote.is_some() { "" } else { " (not synced)" };
                            println!(
                                "{}  {} v{}, {} node(s){}",
                                doc.id,
                                doc.metadata.name,
                                doc.version,
                                doc.nodes.len(),
                                linked
                            );
                        }
                    }
                }
                Ok(())
            }

            DocSubcommand::Show { id, format } => {
                let doc = load(engine, id)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&doc)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", doc);
                        println!();
                        match engine.sync_record(&doc.id) {
                            Some(record) => println!(
                                "Remote: {} (v{}, synced {})",
                                record.remote_link.remote_url,
                                record.remote_version,
                                record.synced_at.format("%Y-%m-%d %H:%M:%S UTC")
                            ),
                            None => println!("Remote: not synced yet"),
                        }
                        let pending = engine
                            .pending_operations()
                            .iter()
                            .filter(|op| op.document.id == doc.id)
                            .count();
                        if pending > 0 {
                            println!("Pending: {} operation(s)", pending);
                        }
                    }
                }
                Ok(())
            }

            DocSubcommand::Rename { id, name } => {
                let mut doc = load(engine, id)?;
                doc.rename(name.clone());
                queue_update(engine, doc)
            }

            DocSubcommand::AddNode {
                id,
                name,
                node_id,
                parent,
                description,
            } => {
                let mut doc = load(engine, id)?;
                let mut node = match node_id {
                    Some(node_id) => Node::with_id(node_id.clone(), name.clone()),
                    None => Node::new(name.clone()),
                };
                if let Some(parent) = parent {
                    node = node.with_parent(parent.clone());
                }
                if let Some(description) = description {
                    node = node.with_description(description.clone());
                }
                let node_id = node.id.clone();
                doc.add_node(node)?;
                println!("Added node: {} ({})", name, node_id);
                queue_update(engine, doc)
            }

            DocSubcommand::RemoveNode { id, node_id } => {
                let mut doc = load(engine, id)?;
                let removed = doc.remove_node(node_id)?;
                for node in &removed {
                    println!("Removed node: {} ({})", node.name, node.id);
                }
                queue_update(engine, doc)
            }

            DocSubcommand::AddPrompt {
                id,
                name,
                content,
                active,
            } => {
                let mut doc = load(engine, id)?;
                let prompt = Prompt::new(name.clone(), content.clone());
                let prompt_id = prompt.id.clone();
                doc.add_prompt(prompt)?;
                if *active {
                    doc.set_active_prompt(Some(prompt_id.as_str()))?;
                }
                println!("Added prompt: {} ({})", name, prompt_id);
                queue_update(engine, doc)
            }

            DocSubcommand::Import { path } => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
                let doc: Document = serde_json::from_str(&contents)?;
                let kind = if doc.remote.is_some() {
                    OperationKind::Update
                } else {
                    OperationKind::Create
                };
                let link = doc.remote.clone();
                let name = doc.metadata.name.clone();
                let doc_id = doc.id.clone();
                engine.enqueue_sync(kind, doc, link)?;
                println!("Imported document: {} ({}), queued {}", name, doc_id, kind);
                Ok(())
            }

            DocSubcommand::Refresh { id } => {
                let id = DocumentId::parse(id)?;
                engine.set_online(remote.is_reachable().await);
                let report = engine.refresh(&id).await?;
                if report.is_current() {
                    println!("Up to date with remote (v{}).", report.remote.version);
                    return Ok(());
                }

                let summary = report.analysis.summary;
                println!(
                    "Remote copy is at v{} (local v{}):",
                    report.remote.version, report.local.version
                );
                println!("  metadata fields: {}", summary.metadata);
                println!(
                    "  nodes: {} added, {} modified, {} deleted",
                    summary.nodes_added, summary.nodes_modified, summary.nodes_deleted
                );
                println!("  prompts: {}", summary.prompts);
                Ok(())
            }
        }
    }
}

fn load(engine: &SyncOrchestrator, id: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let id = DocumentId::parse(id)?;
    engine
        .document(&id)?
        .ok_or_else(|| format!("Document not found: {}", id).into())
}

fn queue_update(
    engine: &SyncOrchestrator,
    doc: Document,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = doc.metadata.name.clone();
    let version = doc.version;
    engine.enqueue_sync(OperationKind::Update, doc, None)?;
    println!("Queued update: {} (v{})", name, version);
    Ok(())
}
