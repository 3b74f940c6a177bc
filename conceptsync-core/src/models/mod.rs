mod document;
mod node;
mod prompt;

pub use document::{Document, DocumentMetadata, RemoteLink, ValidationError, Visibility};
pub use node::Node;
pub use prompt::{Prompt, PromptCollection};
