//! Drives rclone subprocesses for sync tasks and remote file operations.

pub mod args;
pub mod codec;
pub mod engine;
pub mod types;

pub use engine::{TransferOrchestrator, DELTA_BUFFER};
pub use types::{OrchestratorError, TransferHandle};
