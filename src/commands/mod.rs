mod config_cmd;
mod conflict;
mod doc;
mod status;
mod sync_cmd;

use clap::ValueEnum;

pub use config_cmd::ConfigCommand;
pub use conflict::ConflictCommand;
pub use doc::DocCommand;
pub use status::{PendingCommand, StatusCommand};
pub use sync_cmd::SyncCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
