pub mod config;
pub mod error_codes;
pub mod input_validation;
mod json_file;
pub mod logging;
pub mod orchestrator;
pub mod path_validation;
pub mod progress;
pub mod remotes;
pub mod schedule;
pub mod sync_task;
pub mod task_store;
pub mod transfer_error;

pub use config::{AppConfig, BandwidthLimits, TransferSettings};
pub use orchestrator::{OrchestratorError, TransferHandle, TransferOrchestrator};
pub use progress::{ProgressDelta, SyncProgress};
pub use remotes::{CloudRemote, ProviderType, RemoteEntry, RemotesRegistry};
pub use schedule::Schedule;
pub use sync_task::{SyncTask, TaskKind, TaskStatus};
pub use task_store::TaskStore;
pub use transfer_error::TransferError;

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
