use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default maximum number of log lines to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

/// Environment variable consulted for the tracing filter
pub const LOG_ENV_VAR: &str = "CLOUDSYNC_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub task_id: Option<String>,
}

/// User-facing run log, bounded in memory.
///
/// Diagnostics go through `tracing`; this buffer holds the lines a front
/// end shows next to a task.
pub struct LogManager {
    entries: Mutex<VecDeque<LogEntry>>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_lines.min(1024))),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, task_id: Option<&str>) {
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.into(),
            task_id: task_id.map(str::to_string),
        };

        let mut logs = self.lock();
        logs.push_back(entry);

        // Remove from front if full
        while logs.len() > self.max_lines {
            logs.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get_logs(&self, task_id: Option<&str>) -> Vec<LogEntry> {
        let logs = self.lock();
        match task_id {
            Some(id) => logs
                .iter()
                .filter(|l| l.task_id.as_deref() == Some(id))
                .cloned()
                .collect(),
            None => logs.iter().cloned().collect(),
        }
    }

    /// Get logs with pagination for large log sets
    pub fn get_logs_paginated(
        &self,
        task_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Vec<LogEntry> {
        let logs = self.lock();
        logs.iter()
            .filter(|l| task_id.is_none() || l.task_id.as_deref() == task_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear_task(&self, task_id: &str) {
        self.lock().retain(|l| l.task_id.as_deref() != Some(task_id));
    }
}

/// Install the global `tracing` subscriber.
///
/// `CLOUDSYNC_LOG` wins over `default_filter` when set. Calling this twice
/// returns an error instead of replacing the first subscriber.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(default_filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
