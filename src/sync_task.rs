//! The persisted record of one sync/backup/transfer run and its lifecycle.
//!
//! Status changes go through the `pub(crate)` transition methods, which
//! only the orchestrator calls. Everything else reads.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::progress::SyncProgress;
use crate::schedule::Schedule;
use crate::transfer_error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Make the destination identical to the source.
    Sync,
    /// Copy new and changed files, never delete.
    Backup,
    /// Copy files that do not exist at the destination yet.
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyCompleted | Self::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskStateError {
    #[error("task {task_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// How a run ended, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum RunExit {
    Success,
    Failure(TransferError),
    Cancelled,
}

/// Lifecycle state is read through [`SyncTask::status`] and
/// [`SyncTask::finished_partially`]; only the transition methods change it.
///
/// ```compile_fail
/// # use cloudsync_lib::{SyncTask, TaskKind, TaskStatus};
/// # use uuid::Uuid;
/// let mut task = SyncTask::new("Docs", TaskKind::Sync, Uuid::nil(), "/docs", Uuid::nil(), "Docs");
/// task.status = TaskStatus::Completed;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: String,
    pub name: String,
    pub kind: TaskKind,
    status: TaskStatus,
    pub source_remote_id: Uuid,
    pub source_path: String,
    pub destination_remote_id: Uuid,
    pub destination_path: String,
    pub files_transferred: u64,
    pub total_files: u64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub schedule: Option<Schedule>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub error: Option<TransferError>,
    pub error_timestamp: Option<DateTime<Utc>>,
    pub failed_files: Vec<String>,
    /// Snapshot of [`SyncTask::partially_completed`] taken at terminal time.
    partially_completed: bool,
}

impl SyncTask {
    pub fn new(
        name: impl Into<String>,
        kind: TaskKind,
        source_remote_id: Uuid,
        source_path: impl Into<String>,
        destination_remote_id: Uuid,
        destination_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            status: TaskStatus::Pending,
            source_remote_id,
            source_path: source_path.into(),
            destination_remote_id,
            destination_path: destination_path.into(),
            files_transferred: 0,
            total_files: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            schedule: None,
            next_run: None,
            last_run: None,
            error: None,
            error_timestamp: None,
            failed_files: Vec::new(),
            partially_completed: false,
        }
    }

    /// Attach a schedule and compute the first fire time.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.next_run = schedule.next_run(Utc::now());
        self.schedule = Some(schedule);
        self
    }

    fn transition_error(&self, to: TaskStatus) -> TaskStateError {
        TaskStateError::InvalidTransition {
            task_id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TaskStateError> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub(crate) fn mark_paused(&mut self) -> Result<(), TaskStateError> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Paused));
        }
        self.status = TaskStatus::Paused;
        Ok(())
    }

    pub(crate) fn mark_resumed(&mut self) -> Result<(), TaskStateError> {
        if self.status != TaskStatus::Paused {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        Ok(())
    }

    /// Copy live counters into the record. Ignored once the task is terminal.
    pub(crate) fn apply_progress(&mut self, progress: &SyncProgress) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.files_transferred = progress.files_transferred;
        self.total_files = progress.total_files;
        self.bytes_transferred = progress.bytes_transferred;
        self.total_bytes = progress.total_bytes;
        self.failed_files = progress.failed_files.clone();
        true
    }

    /// Move the task into its terminal state.
    ///
    /// A pending task may only be cancelled (it was still queued); any
    /// other exit requires an active run.
    pub(crate) fn finish(
        &mut self,
        progress: &SyncProgress,
        exit: RunExit,
        now: DateTime<Utc>,
    ) -> Result<(), TaskStateError> {
        let allowed = match exit {
            RunExit::Cancelled => !self.status.is_terminal(),
            _ => self.status.is_active(),
        };
        if !allowed {
            let to = match &exit {
                RunExit::Success => TaskStatus::Completed,
                RunExit::Failure(_) => TaskStatus::Failed,
                RunExit::Cancelled => TaskStatus::Cancelled,
            };
            return Err(self.transition_error(to));
        }

        let mut progress = progress.clone();
        progress.reconcile_totals();
        self.apply_progress(&progress);

        let partial = self.partially_completed();
        self.status = match exit {
            RunExit::Cancelled => TaskStatus::Cancelled,
            RunExit::Success if partial => TaskStatus::PartiallyCompleted,
            RunExit::Success => TaskStatus::Completed,
            RunExit::Failure(error) => {
                self.error = Some(error);
                self.error_timestamp = Some(now);
                if partial {
                    TaskStatus::PartiallyCompleted
                } else {
                    TaskStatus::Failed
                }
            }
        };

        self.completed_at = Some(now);
        self.partially_completed = partial && self.status != TaskStatus::Completed;
        if let Some(schedule) = &self.schedule {
            self.last_run = Some(now);
            self.next_run = schedule.next_run(now);
        }
        Ok(())
    }

    /// Reset a finished task so it can run again under the same identifier.
    pub(crate) fn prepare_retry(&mut self) -> Result<(), TaskStateError> {
        if !self.status.is_terminal() {
            return Err(self.transition_error(TaskStatus::Pending));
        }
        self.status = TaskStatus::Pending;
        self.files_transferred = 0;
        self.total_files = 0;
        self.bytes_transferred = 0;
        self.total_bytes = 0;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        self.error_timestamp = None;
        self.failed_files.clear();
        self.partially_completed = false;
        Ok(())
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Whether the run ended with only part of its files transferred.
    /// Fixed when the task reaches a terminal state.
    pub fn finished_partially(&self) -> bool {
        self.partially_completed
    }

    /// Some, but not all, files were transferred.
    pub fn partially_completed(&self) -> bool {
        self.files_transferred > 0 && self.files_transferred < self.total_files
    }

    /// Bytes per second over the run, if the run has a positive duration.
    pub fn average_speed(&self) -> Option<f64> {
        let elapsed = self.duration()?.to_std().ok()?.as_secs_f64();
        (elapsed > 0.0).then(|| self.bytes_transferred as f64 / elapsed)
    }

    pub fn duration(&self) -> Option<Duration> {
        Some(self.completed_at? - self.started_at?)
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.status == TaskStatus::Completed {
            return 1.0;
        }
        if self.total_bytes > 0 {
            (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0)
        } else if self.total_files > 0 {
            (self.files_transferred as f64 / self.total_files as f64).min(1.0)
        } else {
            0.0
        }
    }

    pub fn failure_summary(&self) -> Option<String> {
        if self.failed_files.is_empty() {
            return None;
        }
        Some(format!(
            "Transferred {} of {} files, {} failed",
            self.files_transferred,
            self.total_files,
            self.failed_files.len()
        ))
    }

    /// Whether offering a retry makes sense. Security rejections never do.
    pub fn can_retry(&self) -> bool {
        let retryable_state = matches!(
            self.status,
            TaskStatus::Failed | TaskStatus::PartiallyCompleted | TaskStatus::Cancelled
        );
        retryable_state
            && !self
                .error
                .as_ref()
                .is_some_and(TransferError::is_security_rejection)
    }

    pub fn is_critical_error(&self) -> bool {
        self.error.as_ref().is_some_and(TransferError::is_critical)
    }

    pub fn error_title(&self) -> Option<&'static str> {
        self.error.as_ref().map(TransferError::title)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(TransferError::user_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task() -> SyncTask {
        SyncTask::new(
            "Photos",
            TaskKind::Backup,
            Uuid::new_v4(),
            "/home/me/Photos",
            Uuid::new_v4(),
            "Backups/Photos",
        )
    }

    fn progress(transferred: u64, total: u64, failed: &[&str]) -> SyncProgress {
        SyncProgress {
            files_transferred: transferred,
            total_files: total,
            failed_files: failed.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn running() -> SyncTask {
        let mut task = task();
        task.mark_running(Utc::now()).unwrap();
        task
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.partially_completed);
        assert!(task.average_speed().is_none());
    }

    #[test]
    fn test_serde_roundtrip_with_absent_optionals() {
        let task = task();
        let json = serde_json::to_string(&task).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["startedAt"].is_null());
        assert!(value["error"].is_null());
        assert!(value.as_object().unwrap().contains_key("schedule"));

        let back: SyncTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn test_serde_roundtrip_finished_task() {
        let mut task = running().with_schedule(Schedule::Daily { hour: 3, minute: 0 });
        task.finish(
            &progress(7, 10, &["a", "b", "c"]),
            RunExit::Failure(TransferError::ConnectionTimeout),
            Utc::now(),
        )
        .unwrap();

        let back: SyncTask = serde_json::from_str(&serde_json::to_string(&task).unwrap()).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn test_lifecycle_getters_follow_transitions() {
        let mut task = running();
        task.apply_progress(&progress(3, 6, &[]));
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.partially_completed());
        assert!(!task.finished_partially());

        task.finish(&progress(3, 6, &["x"]), RunExit::Success, Utc::now())
            .unwrap();
        assert_eq!(task.status(), TaskStatus::PartiallyCompleted);
        assert!(task.finished_partially());

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "partiallyCompleted");
        assert_eq!(json["partiallyCompleted"], true);
        let back: SyncTask = serde_json::from_value(json).unwrap();
        assert_eq!(back.status(), TaskStatus::PartiallyCompleted);
        assert!(back.finished_partially());
    }

    #[test]
    fn test_partially_completed_derivation() {
        let mut task = task();
        task.total_files = 10;
        task.files_transferred = 0;
        assert!(!task.partially_completed());
        task.files_transferred = 5;
        assert!(task.partially_completed());
        task.files_transferred = 10;
        assert!(!task.partially_completed());
    }

    #[test]
    fn test_average_speed() {
        let mut task = task();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        task.bytes_transferred = 50_000_000;
        task.started_at = Some(start);
        assert!(task.average_speed().is_none());

        task.completed_at = Some(start);
        assert!(task.average_speed().is_none());

        task.completed_at = Some(start + Duration::seconds(10));
        let speed = task.average_speed().unwrap();
        assert!((speed - 5_000_000.0).abs() < 1.0);

        task.completed_at = Some(start - Duration::seconds(10));
        assert!(task.average_speed().is_none());
    }

    #[test]
    fn test_failure_after_some_files_is_partial() {
        let mut task = running();
        task.finish(
            &progress(7, 10, &["x", "y", "z"]),
            RunExit::Failure(TransferError::Generic {
                message: "3 errors".into(),
            }),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::PartiallyCompleted);
        assert!(task.partially_completed);
        assert_eq!(task.failed_files.len(), 3);
        assert!(task.error.is_some());
        assert_eq!(
            task.failure_summary().as_deref(),
            Some("Transferred 7 of 10 files, 3 failed")
        );
    }

    #[test]
    fn test_failure_with_nothing_transferred() {
        let mut task = running();
        task.finish(
            &progress(0, 0, &[]),
            RunExit::Failure(TransferError::AuthenticationFailed),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.is_critical_error());
        assert_eq!(task.error_title(), Some("Authentication Failed"));
        assert!(task.error_timestamp.is_some());
        assert!(!task.partially_completed);
    }

    #[test]
    fn test_failure_after_every_file_is_failed() {
        let mut task = running();
        task.finish(
            &progress(4, 4, &[]),
            RunExit::Failure(TransferError::ConnectionTimeout),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.files_transferred, 4);
    }

    #[test]
    fn test_success_outcomes() {
        let mut complete = running();
        complete
            .finish(&progress(10, 10, &[]), RunExit::Success, Utc::now())
            .unwrap();
        assert_eq!(complete.status, TaskStatus::Completed);
        assert!(!complete.partially_completed);
        assert_eq!(complete.progress_fraction(), 1.0);

        let mut partial = running();
        partial
            .finish(&progress(3, 10, &[]), RunExit::Success, Utc::now())
            .unwrap();
        assert_eq!(partial.status, TaskStatus::PartiallyCompleted);

        let mut nothing_to_do = running();
        nothing_to_do
            .finish(&progress(0, 0, &[]), RunExit::Success, Utc::now())
            .unwrap();
        assert_eq!(nothing_to_do.status, TaskStatus::Completed);
    }

    #[test]
    fn test_cancel_preserves_counters() {
        let mut task = running();
        let mut live = progress(4, 10, &[]);
        live.bytes_transferred = 4096;
        task.apply_progress(&live);
        task.finish(&live, RunExit::Cancelled, Utc::now()).unwrap();

        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.files_transferred, 4);
        assert_eq!(task.bytes_transferred, 4096);
    }

    #[test]
    fn test_queued_task_can_be_cancelled() {
        let mut task = task();
        task.finish(&SyncProgress::default(), RunExit::Cancelled, Utc::now())
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut task = running();
        task.finish(&progress(1, 1, &[]), RunExit::Success, Utc::now())
            .unwrap();

        assert!(!task.apply_progress(&progress(5, 9, &[])));
        assert_eq!(task.files_transferred, 1);
        assert!(task
            .finish(&progress(0, 1, &[]), RunExit::Cancelled, Utc::now())
            .is_err());
        assert!(task.mark_running(Utc::now()).is_err());
    }

    #[test]
    fn test_pause_resume_transitions() {
        let mut task = task();
        assert!(task.mark_paused().is_err());
        task.mark_running(Utc::now()).unwrap();
        task.mark_paused().unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.mark_paused().is_err());
        task.mark_resumed().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_prepare_retry_resets_run_state() {
        let mut task = running();
        let id = task.id.clone();
        task.finish(
            &progress(2, 5, &["bad.txt"]),
            RunExit::Failure(TransferError::ConnectionTimeout),
            Utc::now(),
        )
        .unwrap();
        assert!(task.can_retry());

        task.prepare_retry().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.files_transferred, 0);
        assert!(task.failed_files.is_empty());
        assert!(task.error.is_none());
        assert!(task.started_at.is_none());

        assert!(task.prepare_retry().is_err());
    }

    #[test]
    fn test_security_rejection_cannot_retry() {
        let mut task = running();
        task.finish(
            &SyncProgress::default(),
            RunExit::Failure(TransferError::PathTraversal {
                path: "../etc".into(),
            }),
            Utc::now(),
        )
        .unwrap();
        assert!(!task.can_retry());
    }

    #[test]
    fn test_finish_updates_schedule() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut task = running().with_schedule(Schedule::Hourly { minute: 0 });
        task.finish(&progress(1, 1, &[]), RunExit::Success, now)
            .unwrap();
        assert_eq!(task.last_run, Some(now));
        assert_eq!(task.next_run, Some(now + Duration::hours(1)));
    }
}
