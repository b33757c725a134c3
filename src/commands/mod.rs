mod config_cmd;
mod queue_cmd;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use queue_cmd::QueueCommand;
pub use sync_cmd::SyncCommand;
