//! On-disk store for task records and their run history.
//!
//! Active tasks live in `tasks.json`; finished runs are moved to
//! `history.json`, newest first. Every mutation is written through with an
//! atomic rename so a crash never leaves a half-written file behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::json_file::{read_json, write_json};
use crate::sync_task::{SyncTask, TaskStatus};

/// History entries kept before the oldest are dropped.
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} already exists")]
    DuplicateId(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {0} has not finished")]
    NotFinished(String),

    #[error("task store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct TaskStore {
    tasks_path: PathBuf,
    history_path: PathBuf,
    tasks: Vec<SyncTask>,
    history: Vec<SyncTask>,
}

impl TaskStore {
    /// Open the store, reading whatever files already exist.
    pub fn open(tasks_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let tasks_path = tasks_path.into();
        let history_path = history_path.into();
        let tasks: Vec<SyncTask> = read_json::<_, StoreError>(&tasks_path)?;
        let mut history: Vec<SyncTask> = read_json::<_, StoreError>(&history_path)?;
        history.truncate(MAX_HISTORY);

        debug!(
            tasks = tasks.len(),
            history = history.len(),
            path = %tasks_path.display(),
            "opened task store"
        );
        Ok(Self {
            tasks_path,
            history_path,
            tasks,
            history,
        })
    }

    /// Store rooted at `data_dir` using the standard file names.
    pub fn in_dir(data_dir: &Path) -> Result<Self, StoreError> {
        Self::open(data_dir.join("tasks.json"), data_dir.join("history.json"))
    }

    pub fn tasks(&self) -> &[SyncTask] {
        &self.tasks
    }

    /// Finished runs, newest first.
    pub fn history(&self) -> &[SyncTask] {
        &self.history
    }

    pub fn get(&self, task_id: &str) -> Option<&SyncTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn create_task(&mut self, task: SyncTask) -> Result<(), StoreError> {
        if self.get(&task.id).is_some() {
            return Err(StoreError::DuplicateId(task.id));
        }
        self.tasks.push(task);
        self.save_tasks()
    }

    /// Replace the stored record with the same id.
    pub fn update(&mut self, task: SyncTask) -> Result<(), StoreError> {
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        *slot = task;
        self.save_tasks()
    }

    /// Move a finished task to the front of the history.
    pub fn move_to_history(&mut self, task_id: &str) -> Result<SyncTask, StoreError> {
        let index = self.index_of(task_id)?;
        if !self.tasks[index].status().is_terminal() {
            return Err(StoreError::NotFinished(task_id.to_string()));
        }
        let task = self.tasks.remove(index);
        self.history.insert(0, task.clone());
        self.history.truncate(MAX_HISTORY);

        self.save_tasks()?;
        self.save_history()?;
        Ok(task)
    }

    pub fn delete(&mut self, task_id: &str) -> Result<SyncTask, StoreError> {
        let index = self.index_of(task_id)?;
        let task = self.tasks.remove(index);
        self.save_tasks()?;
        Ok(task)
    }

    pub fn clear_history(&mut self) -> Result<(), StoreError> {
        self.history.clear();
        self.save_history()
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    pub fn pending_count(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    /// Scheduled tasks whose next fire time has passed and that are not
    /// currently running or paused.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<&SyncTask> {
        self.tasks
            .iter()
            .filter(|t| t.schedule.is_some() && !t.status().is_active())
            .filter(|t| t.next_run.is_some_and(|at| at <= now))
            .collect()
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    fn index_of(&self, task_id: &str) -> Result<usize, StoreError> {
        self.tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    fn save_tasks(&self) -> Result<(), StoreError> {
        write_json(&self.tasks_path, &self.tasks)
    }

    fn save_history(&self) -> Result<(), StoreError> {
        write_json(&self.history_path, &self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use crate::sync_task::{RunExit, TaskKind};
    use crate::progress::SyncProgress;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn task(name: &str) -> SyncTask {
        SyncTask::new(name, TaskKind::Sync, Uuid::new_v4(), "/data", Uuid::new_v4(), "Backup")
    }

    fn finished(name: &str) -> SyncTask {
        let mut t = task(name);
        t.mark_running(Utc::now()).unwrap();
        t.finish(&SyncProgress::default(), RunExit::Success, Utc::now())
            .unwrap();
        t
    }

    #[test]
    fn test_open_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::in_dir(dir.path()).unwrap();
        assert!(store.tasks().is_empty());
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_create_and_reload() {
        let dir = TempDir::new().unwrap();
        let t = task("Photos");
        let id = t.id.clone();

        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        store.create_task(t.clone()).unwrap();
        assert!(matches!(
            store.create_task(t),
            Err(StoreError::DuplicateId(_))
        ));

        let reopened = TaskStore::in_dir(dir.path()).unwrap();
        assert_eq!(reopened.get(&id).map(|t| t.name.as_str()), Some("Photos"));
    }

    #[test]
    fn test_update_replaces_record() {
        let dir = TempDir::new().unwrap();
        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        let mut t = task("Docs");
        store.create_task(t.clone()).unwrap();

        t.mark_running(Utc::now()).unwrap();
        store.update(t.clone()).unwrap();
        assert_eq!(store.running_count(), 1);
        assert_eq!(store.pending_count(), 0);

        assert!(matches!(
            store.update(task("Other")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_move_to_history_requires_terminal() {
        let dir = TempDir::new().unwrap();
        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        let pending = task("Pending");
        store.create_task(pending.clone()).unwrap();
        assert!(matches!(
            store.move_to_history(&pending.id),
            Err(StoreError::NotFinished(_))
        ));

        let done = finished("Done");
        store.create_task(done.clone()).unwrap();
        store.move_to_history(&done.id).unwrap();
        assert!(store.get(&done.id).is_none());
        assert_eq!(store.history()[0].id, done.id);

        let reopened = TaskStore::in_dir(dir.path()).unwrap();
        assert_eq!(reopened.history().len(), 1);
        assert_eq!(reopened.tasks().len(), 1);
    }

    #[test]
    fn test_history_is_newest_first_and_capped() {
        let dir = TempDir::new().unwrap();
        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        let mut last_id = String::new();
        for i in 0..(MAX_HISTORY + 5) {
            let t = finished(&format!("run {i}"));
            last_id = t.id.clone();
            store.create_task(t).unwrap();
            store.move_to_history(&last_id).unwrap();
        }
        assert_eq!(store.history().len(), MAX_HISTORY);
        assert_eq!(store.history()[0].id, last_id);

        store.clear_history().unwrap();
        assert!(TaskStore::in_dir(dir.path()).unwrap().history().is_empty());
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        let t = task("Gone");
        store.create_task(t.clone()).unwrap();
        assert_eq!(store.delete(&t.id).unwrap().name, "Gone");
        assert!(matches!(store.delete(&t.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_due_tasks() {
        let dir = TempDir::new().unwrap();
        let mut store = TaskStore::in_dir(dir.path()).unwrap();
        let now = Utc::now();

        let mut due = task("Hourly").with_schedule(Schedule::Hourly { minute: 0 });
        due.next_run = Some(now - Duration::minutes(1));
        let mut later = task("Later").with_schedule(Schedule::Hourly { minute: 0 });
        later.next_run = Some(now + Duration::hours(1));
        store.create_task(due.clone()).unwrap();
        store.create_task(later).unwrap();
        store.create_task(task("Manual")).unwrap();

        let ids: Vec<&str> = store.due_tasks(now).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![due.id.as_str()]);
    }

    #[test]
    fn test_open_reads_records_written_elsewhere() {
        let dir = TempDir::new().unwrap();
        let active = task("Music");
        let done = finished("Videos");
        fs::write(
            dir.path().join("tasks.json"),
            serde_json::to_string(&vec![active.clone()]).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("history.json"),
            serde_json::to_string(&vec![done.clone()]).unwrap(),
        )
        .unwrap();

        let store = TaskStore::in_dir(dir.path()).unwrap();
        assert_eq!(store.tasks(), &[active][..]);
        assert_eq!(store.history(), &[done][..]);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tasks.json"), "{not json").unwrap();
        assert!(matches!(
            TaskStore::in_dir(dir.path()),
            Err(StoreError::Json(_))
        ));
    }
}
