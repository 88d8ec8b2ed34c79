use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error_codes;
use crate::progress::ProgressDelta;
use crate::remotes::RegistryError;
use crate::sync_task::{SyncTask, TaskStateError};
use crate::transfer_error::TransferError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Input was rejected before any subprocess existed.
    #[error("{0}")]
    Rejected(TransferError),

    /// A one-shot rclone command exited unsuccessfully.
    #[error("{0}")]
    Transfer(TransferError),

    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("remote {0} not found")]
    RemoteNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidTransition(#[from] TaskStateError),

    #[error("task {0} is not active")]
    NotActive(String),

    #[error("failed to start rclone: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to signal rclone: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("unreadable rclone output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("run for task {0} ended without reporting an outcome")]
    Aborted(String),
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(e) | Self::Transfer(e) => e.code(),
            Self::AlreadyRunning(_) => error_codes::ERR_TASK_ALREADY_RUNNING,
            Self::RemoteNotFound(_) => error_codes::ERR_REMOTE_NOT_FOUND,
            _ => error_codes::ERR_TRANSFER_FAILED,
        }
    }

    /// The typed transfer error, for variants that carry one.
    pub fn transfer_error(&self) -> Option<&TransferError> {
        match self {
            Self::Rejected(e) | Self::Transfer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::RemoteNotFound(id),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunControl {
    Pause,
    Resume,
}

pub(crate) struct ControlRequest {
    pub command: RunControl,
    pub reply: oneshot::Sender<Result<(), OrchestratorError>>,
}

/// Caller's end of a started run.
///
/// Deltas arrive in the order rclone produced them and stop before the
/// final task record is published. The delta buffer is bounded: a caller
/// that falls further behind than that misses deltas, while the snapshot
/// and the terminal record still carry the full counters.
#[derive(Debug)]
pub struct TransferHandle {
    task_id: String,
    deltas: mpsc::Receiver<ProgressDelta>,
    snapshot: watch::Receiver<SyncTask>,
    outcome: oneshot::Receiver<SyncTask>,
}

impl TransferHandle {
    pub(crate) fn new(
        task_id: String,
        deltas: mpsc::Receiver<ProgressDelta>,
        snapshot: watch::Receiver<SyncTask>,
        outcome: oneshot::Receiver<SyncTask>,
    ) -> Self {
        Self {
            task_id,
            deltas,
            snapshot,
            outcome,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The next progress delta, or `None` once the run has ended.
    pub async fn next_delta(&mut self) -> Option<ProgressDelta> {
        self.deltas.recv().await
    }

    /// Latest task record, including live counters.
    pub fn snapshot(&self) -> SyncTask {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every published task record.
    pub fn subscribe(&self) -> watch::Receiver<SyncTask> {
        self.snapshot.clone()
    }

    /// Split into a delta stream and the terminal record.
    pub fn into_parts(
        self,
    ) -> (ReceiverStream<ProgressDelta>, oneshot::Receiver<SyncTask>) {
        (ReceiverStream::new(self.deltas), self.outcome)
    }

    /// Wait for the terminal task record, discarding undelivered deltas.
    pub async fn finish(self) -> Result<SyncTask, OrchestratorError> {
        let Self {
            task_id,
            deltas,
            outcome,
            ..
        } = self;
        drop(deltas);
        outcome
            .await
            .map_err(|_| OrchestratorError::Aborted(task_id))
    }
}
