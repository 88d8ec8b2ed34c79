use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::args::{self, count_local_files, transfer_args, TransferEndpoints};
use super::codec::OutputLineCodec;
use super::types::{ControlRequest, OrchestratorError, RunControl, TransferHandle};
use crate::config::{AppConfig, TransferSettings};
use crate::input_validation::{validate_connection_name, validate_exclude_patterns, validate_task_id};
use crate::logging::{LogLevel, LogManager};
use crate::path_validation::{validate_local_path, validate_remote_path};
use crate::progress::{ProgressDelta, ProgressParser, RcloneProgressParser, SyncProgress};
use crate::remotes::{CloudRemote, RemoteEntry, RemotesRegistry};
use crate::sync_task::{RunExit, SyncTask, TaskStateError, TaskStatus};
use crate::transfer_error::{ErrorClassifier, FailureSignal, PatternClassifier, TransferError};

/// Time a terminated rclone gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Stderr lines kept for classification.
const STDERR_TAIL_LINES: usize = 64;

/// Deltas buffered for a caller before further ones are dropped.
pub const DELTA_BUFFER: usize = 1024;

struct ActiveRun {
    cancel: CancellationToken,
    control: mpsc::UnboundedSender<ControlRequest>,
    snapshot: watch::Receiver<SyncTask>,
}

type ActiveRuns = Arc<RwLock<HashMap<String, ActiveRun>>>;

/// Endpoints resolved and validated at `start` time.
#[derive(Debug, Clone)]
struct TransferPlan {
    endpoints: TransferEndpoints,
    local_source: Option<PathBuf>,
    /// Display name of the destination provider, used to label quota errors.
    provider_name: String,
}

/// Runs rclone on behalf of sync tasks.
///
/// Each task gets at most one live subprocess. Runs beyond the concurrency
/// limit wait for a permit while staying `pending`.
pub struct TransferOrchestrator {
    registry: Arc<RwLock<RemotesRegistry>>,
    settings: Arc<RwLock<TransferSettings>>,
    permits: Arc<Semaphore>,
    active: ActiveRuns,
    parser: Arc<dyn ProgressParser>,
    classifier: Arc<dyn ErrorClassifier>,
    logs: Arc<LogManager>,
}

impl TransferOrchestrator {
    pub fn new(registry: RemotesRegistry, settings: TransferSettings, max_concurrent: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            settings: Arc::new(RwLock::new(settings)),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Arc::new(RwLock::new(HashMap::new())),
            parser: Arc::new(RcloneProgressParser::new()),
            classifier: Arc::new(PatternClassifier::new()),
            logs: Arc::new(LogManager::default()),
        }
    }

    pub fn from_config(config: &AppConfig, registry: RemotesRegistry) -> Self {
        Self::new(
            registry,
            config.transfer_settings(),
            config.max_concurrent_transfers,
        )
        .with_log_manager(Arc::new(LogManager::new(config.log_capacity)))
    }

    pub fn with_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_log_manager(mut self, logs: Arc<LogManager>) -> Self {
        self.logs = logs;
        self
    }

    pub fn registry(&self) -> Arc<RwLock<RemotesRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn log_manager(&self) -> Arc<LogManager> {
        Arc::clone(&self.logs)
    }

    pub async fn settings(&self) -> TransferSettings {
        self.settings.read().await.clone()
    }

    /// Replace the global settings. Runs already spawned keep their copy.
    pub async fn update_settings(&self, settings: TransferSettings) {
        *self.settings.write().await = settings;
    }

    pub async fn is_active(&self, task_id: &str) -> bool {
        self.active.read().await.contains_key(task_id)
    }

    pub async fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Latest record of an active task.
    pub async fn snapshot(&self, task_id: &str) -> Option<SyncTask> {
        self.active
            .read()
            .await
            .get(task_id)
            .map(|run| run.snapshot.borrow().clone())
    }

    /// Validate the task's endpoints and launch it.
    ///
    /// Validation failures are returned here and nothing is spawned. Once a
    /// handle is returned, every later failure is reported through the
    /// terminal task record.
    pub async fn start(&self, task: SyncTask) -> Result<TransferHandle, OrchestratorError> {
        if task.status() != TaskStatus::Pending {
            return Err(TaskStateError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status(),
                to: TaskStatus::Running,
            }
            .into());
        }
        validate_task_id(&task.id).map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;

        let settings = self.settings.read().await.clone();
        validate_exclude_patterns(&settings.exclude_patterns)
            .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;
        let plan = self.plan_transfer(&task).await?;

        let mut active = self.active.write().await;
        if active.contains_key(&task.id) {
            warn!(task_id = %task.id, "rejected second start for active task");
            return Err(OrchestratorError::AlreadyRunning(task.id));
        }

        let task_id = task.id.clone();
        let cancel = CancellationToken::new();
        let (delta_tx, delta_rx) = mpsc::channel(DELTA_BUFFER);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(task.clone());
        let (outcome_tx, outcome_rx) = oneshot::channel();

        active.insert(
            task_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                control: control_tx,
                snapshot: snapshot_rx.clone(),
            },
        );
        drop(active);

        if self.permits.available_permits() == 0 {
            info!(task_id = %task_id, "transfer queued");
            self.logs.log(
                LogLevel::Info,
                format!("Queued \"{}\" until a transfer slot frees up", task.name),
                Some(&task_id),
            );
        }

        let run = RunContext {
            task,
            progress: SyncProgress::default(),
            plan,
            settings,
            cancel,
            control_rx,
            delta_tx: Some(delta_tx),
            snapshot_tx,
            outcome_tx: Some(outcome_tx),
            permits: Arc::clone(&self.permits),
            active: Arc::clone(&self.active),
            parser: Arc::clone(&self.parser),
            classifier: Arc::clone(&self.classifier),
            logs: Arc::clone(&self.logs),
        };
        tokio::spawn(run.execute());

        Ok(TransferHandle::new(task_id, delta_rx, snapshot_rx, outcome_rx))
    }

    /// Reset a finished task and start it again under the same identifier.
    pub async fn retry(&self, mut task: SyncTask) -> Result<TransferHandle, OrchestratorError> {
        task.prepare_retry()?;
        info!(task_id = %task.id, "retrying task");
        self.start(task).await
    }

    /// Stop an active task and wait for its terminal record.
    ///
    /// Returns `None` when the task is not active.
    pub async fn cancel(&self, task_id: &str) -> Result<Option<SyncTask>, OrchestratorError> {
        let target = self
            .active
            .read()
            .await
            .get(task_id)
            .map(|run| (run.cancel.clone(), run.snapshot.clone()));
        let Some((token, mut snapshot)) = target else {
            debug!(task_id, "cancel requested for inactive task");
            return Ok(None);
        };

        info!(task_id, "cancelling task");
        token.cancel();

        let finished = snapshot
            .wait_for(|task| task.status().is_terminal())
            .await
            .map(|task| task.clone());
        let task = match finished {
            Ok(task) => task,
            Err(_) => snapshot.borrow().clone(),
        };
        Ok(Some(task))
    }

    pub async fn pause(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.control(task_id, RunControl::Pause).await
    }

    pub async fn resume(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.control(task_id, RunControl::Resume).await
    }

    async fn control(&self, task_id: &str, command: RunControl) -> Result<(), OrchestratorError> {
        let sender = self
            .active
            .read()
            .await
            .get(task_id)
            .map(|run| run.control.clone())
            .ok_or_else(|| OrchestratorError::NotActive(task_id.to_string()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(ControlRequest { command, reply })
            .map_err(|_| OrchestratorError::NotActive(task_id.to_string()))?;
        response
            .await
            .map_err(|_| OrchestratorError::NotActive(task_id.to_string()))?
    }

    pub async fn list(&self, remote_id: Uuid, path: &str) -> Result<Vec<RemoteEntry>, OrchestratorError> {
        let (target, provider) = self.resolve_target(remote_id, path).await?;
        let settings = self.settings().await;
        let stdout = self
            .run_command(args::list_args(&target, &settings), &settings, &provider)
            .await?;

        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&stdout)?)
    }

    pub async fn delete_file(&self, remote_id: Uuid, path: &str) -> Result<(), OrchestratorError> {
        let (target, provider) = self.resolve_target(remote_id, path).await?;
        let settings = self.settings().await;
        self.run_command(args::delete_file_args(&target, &settings), &settings, &provider)
            .await?;
        info!(remote = %target, "deleted file");
        Ok(())
    }

    pub async fn delete_folder(&self, remote_id: Uuid, path: &str) -> Result<(), OrchestratorError> {
        let (target, provider) = self.resolve_target(remote_id, path).await?;
        let settings = self.settings().await;
        self.run_command(args::delete_folder_args(&target, &settings), &settings, &provider)
            .await?;
        info!(remote = %target, "deleted folder");
        Ok(())
    }

    pub async fn rename(&self, remote_id: Uuid, from: &str, to: &str) -> Result<(), OrchestratorError> {
        let (source, provider) = self.resolve_target(remote_id, from).await?;
        let (destination, _) = self.resolve_target(remote_id, to).await?;
        let settings = self.settings().await;
        self.run_command(args::rename_args(&source, &destination, &settings), &settings, &provider)
            .await?;
        info!(from = %source, to = %destination, "renamed");
        Ok(())
    }

    pub async fn create_folder(&self, remote_id: Uuid, path: &str) -> Result<(), OrchestratorError> {
        let (target, provider) = self.resolve_target(remote_id, path).await?;
        let settings = self.settings().await;
        self.run_command(args::create_folder_args(&target, &settings), &settings, &provider)
            .await?;
        info!(remote = %target, "created folder");
        Ok(())
    }

    async fn plan_transfer(&self, task: &SyncTask) -> Result<TransferPlan, OrchestratorError> {
        let registry = self.registry.read().await;
        let source = registry
            .get(task.source_remote_id)
            .ok_or(OrchestratorError::RemoteNotFound(task.source_remote_id))?;
        let destination = registry
            .get(task.destination_remote_id)
            .ok_or(OrchestratorError::RemoteNotFound(task.destination_remote_id))?;

        let source_arg = endpoint(source, &task.source_path)?;
        let destination_arg = endpoint(destination, &task.destination_path)?;
        let local_source = source
            .provider
            .is_local()
            .then(|| PathBuf::from(&source_arg));

        Ok(TransferPlan {
            endpoints: TransferEndpoints {
                source: source_arg,
                destination: destination_arg,
                destination_provider: destination.provider,
                local_file_count: None,
            },
            local_source,
            provider_name: destination.provider.display_name().to_string(),
        })
    }

    async fn resolve_target(&self, remote_id: Uuid, path: &str) -> Result<(String, String), OrchestratorError> {
        let registry = self.registry.read().await;
        let remote = registry
            .get(remote_id)
            .ok_or(OrchestratorError::RemoteNotFound(remote_id))?;
        let target = endpoint(remote, path)?;
        Ok((target, remote.provider.display_name().to_string()))
    }

    /// Run a short rclone command to completion and return its stdout.
    async fn run_command(
        &self,
        args: Vec<String>,
        settings: &TransferSettings,
        provider: &str,
    ) -> Result<Vec<u8>, OrchestratorError> {
        debug!(?args, "running rclone command");
        let mut command = Command::new(&settings.rclone_path);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        let output = command.output();

        let output = match settings.run_timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), output).await {
                Ok(result) => result,
                Err(_) => {
                    let error = self.classifier.classify(&FailureSignal::timeout(), provider);
                    warn!(command = %args[0], "rclone command timed out");
                    return Err(OrchestratorError::Transfer(error));
                }
            },
            None => output.await,
        }
        .map_err(OrchestratorError::Spawn)?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let signal = FailureSignal::from_exit(
            output.status.code(),
            String::from_utf8_lossy(&output.stderr),
        );
        let error = self.classifier.classify(&signal, provider);
        warn!(
            command = %args[0],
            exit_code = ?output.status.code(),
            error = %error,
            "rclone command failed"
        );
        Err(OrchestratorError::Transfer(error))
    }
}

/// Validate `path` for `remote` and build the argument rclone receives.
fn endpoint(remote: &CloudRemote, path: &str) -> Result<String, OrchestratorError> {
    let validated = if remote.provider.is_local() {
        validate_local_path(path)
    } else {
        validate_remote_path(path)
    }
    .map_err(OrchestratorError::Rejected)?;

    let connection = remote.connection_name();
    validate_connection_name(&connection)
        .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;

    let argument = remote.remote_spec(&validated);
    if argument.starts_with('-') {
        return Err(OrchestratorError::Rejected(TransferError::InvalidPath {
            path: path.to_string(),
        }));
    }
    Ok(argument)
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), Errno> {
    let pid = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
    kill(Pid::from_raw(pid), signal)
}

/// SIGTERM, then SIGKILL if rclone does not exit within the grace period.
async fn terminate(child: &mut Child, paused: bool) {
    if let Some(pid) = child.id() {
        if paused {
            let _ = send_signal(pid, Signal::SIGCONT);
        }
        if send_signal(pid, Signal::SIGTERM).is_ok()
            && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
        {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill rclone");
    }
}

enum PermitWait {
    Acquired(OwnedSemaphorePermit),
    Cancelled,
    Closed,
}

enum StreamEnd {
    Exited,
    Cancelled,
    TimedOut,
}

/// Everything one run owns. Lives on its own tokio task.
struct RunContext {
    task: SyncTask,
    progress: SyncProgress,
    plan: TransferPlan,
    settings: TransferSettings,
    cancel: CancellationToken,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    delta_tx: Option<mpsc::Sender<ProgressDelta>>,
    snapshot_tx: watch::Sender<SyncTask>,
    outcome_tx: Option<oneshot::Sender<SyncTask>>,
    permits: Arc<Semaphore>,
    active: ActiveRuns,
    parser: Arc<dyn ProgressParser>,
    classifier: Arc<dyn ErrorClassifier>,
    logs: Arc<LogManager>,
}

impl RunContext {
    async fn execute(mut self) {
        let permit = match self.wait_for_permit().await {
            PermitWait::Acquired(permit) => permit,
            PermitWait::Cancelled => {
                self.finalize(RunExit::Cancelled).await;
                return;
            }
            PermitWait::Closed => {
                let error = TransferError::Generic {
                    message: "Transfer slots are no longer available".to_string(),
                };
                self.finalize(RunExit::Failure(error)).await;
                return;
            }
        };

        if let Err(e) = self.task.mark_running(Utc::now()) {
            error!(task_id = %self.task.id, error = %e, "could not start task");
            drop(permit);
            self.finalize(RunExit::Cancelled).await;
            return;
        }
        self.publish();
        info!(
            task_id = %self.task.id,
            source = %self.plan.endpoints.source,
            remote = %self.plan.endpoints.destination,
            "transfer started"
        );
        self.logs.log(
            LogLevel::Info,
            format!(
                "Started {:?} of {} to {}",
                self.task.kind, self.plan.endpoints.source, self.plan.endpoints.destination
            ),
            Some(&self.task.id),
        );

        let mut endpoints = self.plan.endpoints.clone();
        if let Some(dir) = self.plan.local_source.clone() {
            let count = tokio::task::spawn_blocking(move || count_local_files(&dir));
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finalize(RunExit::Cancelled).await;
                    drop(permit);
                    return;
                }
                count = count => endpoints.local_file_count = count.ok().flatten(),
            }
        }
        let args = transfer_args(self.task.kind, &endpoints, &self.settings);

        let exit = self.run_process(args).await;
        self.finalize(exit).await;
        drop(permit);
    }

    async fn wait_for_permit(&mut self) -> PermitWait {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PermitWait::Cancelled,
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    return match permit {
                        Ok(permit) => PermitWait::Acquired(permit),
                        Err(_) => PermitWait::Closed,
                    };
                }
                Some(request) = self.control_rx.recv() => {
                    let to = match request.command {
                        RunControl::Pause => TaskStatus::Paused,
                        RunControl::Resume => TaskStatus::Running,
                    };
                    let err = TaskStateError::InvalidTransition {
                        task_id: self.task.id.clone(),
                        from: self.task.status(),
                        to,
                    };
                    let _ = request.reply.send(Err(err.into()));
                }
            }
        }
    }

    async fn run_process(&mut self, args: Vec<String>) -> RunExit {
        if self.cancel.is_cancelled() {
            debug!(task_id = %self.task.id, "cancelled before rclone was spawned");
            return RunExit::Cancelled;
        }
        debug!(task_id = %self.task.id, ?args, "spawning rclone");
        let spawned = Command::new(&self.settings.rclone_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(task_id = %self.task.id, error = %e, "failed to spawn rclone");
                return RunExit::Failure(TransferError::Generic {
                    message: format!("Failed to start rclone: {e}"),
                });
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, false).await;
            return RunExit::Failure(TransferError::Generic {
                message: "rclone output could not be captured".to_string(),
            });
        };

        let stdout = FramedRead::new(stdout, OutputLineCodec::new()).map(|line| line.map(|l| (false, l)));
        let stderr = FramedRead::new(stderr, OutputLineCodec::new()).map(|line| line.map(|l| (true, l)));
        let mut output = futures_util::stream::select(stdout, stderr);

        // The run timeout only counts time rclone is allowed to run; a
        // resume pushes the deadline back by the time spent paused.
        let limit = self.settings.run_timeout_secs.map(Duration::from_secs);
        let timeout = tokio::time::sleep(limit.unwrap_or_default());
        tokio::pin!(timeout);
        let mut paused_at: Option<Instant> = None;

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let end = loop {
            tokio::select! {
                line = output.next() => match line {
                    Some(Ok((from_stderr, line))) => {
                        if from_stderr {
                            if stderr_tail.len() == STDERR_TAIL_LINES {
                                stderr_tail.pop_front();
                            }
                            stderr_tail.push_back(line.clone());
                        }
                        self.handle_line(&line);
                    }
                    Some(Err(e)) => {
                        warn!(task_id = %self.task.id, error = %e, "failed to read rclone output");
                    }
                    None => break StreamEnd::Exited,
                },
                _ = self.cancel.cancelled() => break StreamEnd::Cancelled,
                _ = &mut timeout, if limit.is_some() && paused_at.is_none() => {
                    break StreamEnd::TimedOut;
                }
                Some(request) = self.control_rx.recv() => {
                    let command = request.command;
                    if self.handle_control(request, child.id()) {
                        match command {
                            RunControl::Pause => paused_at = Some(Instant::now()),
                            RunControl::Resume => {
                                if let Some(since) = paused_at.take() {
                                    let deadline = timeout.deadline() + since.elapsed();
                                    timeout.as_mut().reset(deadline);
                                }
                            }
                        }
                    }
                }
            }
        };

        let paused = self.task.status() == TaskStatus::Paused;
        match end {
            StreamEnd::Cancelled => {
                terminate(&mut child, paused).await;
                RunExit::Cancelled
            }
            StreamEnd::TimedOut => {
                warn!(task_id = %self.task.id, "rclone exceeded run timeout");
                terminate(&mut child, paused).await;
                RunExit::Failure(
                    self.classifier
                        .classify(&FailureSignal::timeout(), &self.plan.provider_name),
                )
            }
            StreamEnd::Exited => match child.wait().await {
                Ok(status) if status.success() => RunExit::Success,
                Ok(status) => {
                    let stderr = Vec::from(stderr_tail).join("\n");
                    let signal = FailureSignal::from_exit(status.code(), stderr)
                        .with_last_error(self.progress.error_message.clone());
                    debug!(task_id = %self.task.id, exit_code = ?status.code(), "rclone failed");
                    RunExit::Failure(self.classifier.classify(&signal, &self.plan.provider_name))
                }
                Err(e) => RunExit::Failure(TransferError::Generic {
                    message: format!("Failed to wait for rclone: {e}"),
                }),
            },
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(delta) = self.parser.parse(line) else {
            return;
        };

        if let Some(file) = &delta.failed_file {
            warn!(task_id = %self.task.id, file = %file, "file failed to transfer");
            self.logs
                .log(LogLevel::Error, format!("Failed: {file}"), Some(&self.task.id));
        }

        self.progress.apply(&delta);
        if self.task.apply_progress(&self.progress) {
            self.publish();
            if let Some(tx) = &self.delta_tx {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(delta) {
                    debug!(task_id = %self.task.id, "delta buffer full, dropping delta");
                }
            }
        }
    }

    /// Apply a pause or resume and answer the caller. Returns whether it took effect.
    fn handle_control(&mut self, request: ControlRequest, pid: Option<u32>) -> bool {
        let result = self.apply_control(request.command, pid);
        let applied = result.is_ok();
        if applied {
            self.publish();
            let message = match request.command {
                RunControl::Pause => "Paused",
                RunControl::Resume => "Resumed",
            };
            info!(task_id = %self.task.id, "{}", message.to_lowercase());
            self.logs.log(LogLevel::Info, message, Some(&self.task.id));
        }
        let _ = request.reply.send(result);
        applied
    }

    fn apply_control(&mut self, command: RunControl, pid: Option<u32>) -> Result<(), OrchestratorError> {
        let pid = pid.ok_or_else(|| OrchestratorError::NotActive(self.task.id.clone()))?;
        match command {
            RunControl::Pause => {
                self.task.mark_paused()?;
                if let Err(e) = send_signal(pid, Signal::SIGSTOP) {
                    let _ = self.task.mark_resumed();
                    return Err(e.into());
                }
            }
            RunControl::Resume => {
                self.task.mark_resumed()?;
                if let Err(e) = send_signal(pid, Signal::SIGCONT) {
                    let _ = self.task.mark_paused();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.task.clone());
    }

    async fn finalize(mut self, exit: RunExit) {
        if let Err(e) = self.task.finish(&self.progress, exit, Utc::now()) {
            error!(task_id = %self.task.id, error = %e, "could not finalize task");
        }

        // No delta may follow the terminal record.
        self.delta_tx.take();
        self.active.write().await.remove(&self.task.id);

        self.log_outcome();
        self.publish();
        if let Some(outcome) = self.outcome_tx.take() {
            let _ = outcome.send(self.task.clone());
        }
    }

    fn log_outcome(&self) {
        let task = &self.task;
        let (level, message) = match task.status() {
            TaskStatus::Completed => (
                LogLevel::Success,
                format!(
                    "Completed: {} files, {} bytes",
                    task.files_transferred, task.bytes_transferred
                ),
            ),
            TaskStatus::PartiallyCompleted => (
                LogLevel::Warning,
                task.failure_summary().unwrap_or_else(|| {
                    format!(
                        "Transferred {} of {} files",
                        task.files_transferred, task.total_files
                    )
                }),
            ),
            TaskStatus::Cancelled => (
                LogLevel::Warning,
                format!("Cancelled after {} files", task.files_transferred),
            ),
            _ => (
                LogLevel::Error,
                task.error_message()
                    .unwrap_or_else(|| "Transfer failed".to_string()),
            ),
        };
        info!(
            task_id = %task.id,
            status = ?task.status(),
            files = task.files_transferred,
            failed = task.failed_files.len(),
            "transfer finished"
        );
        self.logs.log(level, message, Some(&task.id));
    }
}
