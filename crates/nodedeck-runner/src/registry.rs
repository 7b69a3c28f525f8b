use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use nodedeck_process::{HandleId, LifecycleEvent, LogTag, ProcessState, ProcessStatus, ServerId};
use tokio::{
    process::Command,
    sync::{Mutex, broadcast, watch},
};

use crate::error::RunnerError;
use crate::installer;
use crate::log_hub::LogSink;
use crate::project_fs;
use crate::resolver::{self, Toolchain};
use crate::support::{own_process_group, stop_requested, unix_millis};

const EVENT_CAPACITY: usize = 256;
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(unix)]
fn describe_exit(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("Process exited with code {code}"),
        (None, Some(sig)) => format!("Process exited with signal {sig}"),
        (None, None) => "Process exited".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_exit(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Process exited with code {code}"),
        None => "Process exited".to_string(),
    }
}

/// Result of [`ProcessRegistry::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No entry for the handle.
    NotFound,
    /// The entry is gone: the process exited or the pending start was cancelled.
    Stopped,
    /// Still registered after SIGKILL.
    Unconfirmed,
}

struct ProcessEntry {
    server_id: ServerId,
    state: ProcessState,
    pid: Option<u32>,
    pgid: Option<i32>,
    message: Option<String>,
    stop_tx: watch::Sender<bool>,
    sink: LogSink,
}

impl ProcessEntry {
    fn status(&self, handle: &HandleId) -> ProcessStatus {
        ProcessStatus {
            handle: handle.clone(),
            server_id: self.server_id.clone(),
            state: self.state,
            pid: self.pid,
            exit_code: None,
            message: self.message.clone(),
        }
    }
}

/// Live child processes keyed by handle.
///
/// An entry exists from the moment a start is accepted (state `Starting`,
/// reserving the server) until the process has exited. Every exit is published
/// on the lifecycle event channel.
#[derive(Clone)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<HandleId, ProcessEntry>>>,
    events: broadcast::Sender<LifecycleEvent>,
    toolchain: Toolchain,
}

/// A `Starting` entry that holds its server until [`Reservation::launch`]
/// spawns the process or fails.
pub struct Reservation {
    registry: ProcessRegistry,
    handle: HandleId,
    server_id: ServerId,
    sink: LogSink,
    stop_rx: watch::Receiver<bool>,
}

impl Reservation {
    pub fn handle(&self) -> &HandleId {
        &self.handle
    }

    /// Resolves, installs and spawns the project in `dir`.
    ///
    /// Returns once the child is spawned; there is no readiness check. A stop
    /// issued before the spawn yields [`RunnerError::Cancelled`].
    pub async fn launch(
        self,
        dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<HandleId, RunnerError> {
        let Reservation {
            registry,
            handle,
            server_id,
            sink,
            stop_rx,
        } = self;

        match registry
            .launch(&handle, &server_id, dir, env, &sink, stop_rx)
            .await
        {
            Ok(()) => Ok(handle),
            Err(err) => {
                registry.inner.lock().await.remove(&handle);
                tracing::warn!(server_id = %server_id, %err, "start failed");
                sink.emit(format!("Failed to start: {err}")).await;
                Err(err)
            }
        }
    }

    /// Drops the reservation without launching.
    pub async fn release(self) {
        self.registry.inner.lock().await.remove(&self.handle);
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(Toolchain::from_env())
    }
}

impl ProcessRegistry {
    pub fn new(toolchain: Toolchain) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            events,
            toolchain,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn contains(&self, handle: &HandleId) -> bool {
        self.inner.lock().await.contains_key(handle)
    }

    pub async fn get(&self, handle: &HandleId) -> Option<ProcessStatus> {
        self.inner.lock().await.get(handle).map(|e| e.status(handle))
    }

    pub async fn list(&self) -> Vec<ProcessStatus> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(h, e)| e.status(h))
            .collect()
    }

    pub async fn handle_for_server(&self, server_id: &ServerId) -> Option<HandleId> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|(_, e)| e.server_id == *server_id)
            .map(|(h, _)| h.clone())
    }

    /// Claims `server_id` with a `Starting` entry. Fails if the server already
    /// has one, starting or running.
    pub async fn reserve(
        &self,
        server_id: &ServerId,
        sink: LogSink,
    ) -> Result<Reservation, RunnerError> {
        let handle = HandleId::for_spawn(server_id, unix_millis());
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut map = self.inner.lock().await;
        if let Some((existing, _)) = map.iter().find(|(_, e)| e.server_id == *server_id) {
            return Err(RunnerError::AlreadyActive {
                server_id: server_id.clone(),
                handle: existing.clone(),
            });
        }
        map.insert(
            handle.clone(),
            ProcessEntry {
                server_id: server_id.clone(),
                state: ProcessState::Starting,
                pid: None,
                pgid: None,
                message: Some("starting".to_string()),
                stop_tx,
                sink: sink.clone(),
            },
        );
        Ok(Reservation {
            registry: self.clone(),
            handle,
            server_id: server_id.clone(),
            sink,
            stop_rx,
        })
    }

    /// [`reserve`](Self::reserve) followed by [`Reservation::launch`].
    pub async fn start(
        &self,
        server_id: &ServerId,
        dir: &Path,
        env: &BTreeMap<String, String>,
        sink: LogSink,
    ) -> Result<HandleId, RunnerError> {
        self.reserve(server_id, sink).await?.launch(dir, env).await
    }

    async fn launch(
        &self,
        handle: &HandleId,
        server_id: &ServerId,
        dir: &Path,
        env: &BTreeMap<String, String>,
        sink: &LogSink,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<(), RunnerError> {
        let files = project_fs::list_files(dir).await?;
        let plan = resolver::resolve(dir, &files, &self.toolchain)?;
        sink.emit(format!("Starting: {}", plan.command_line())).await;

        installer::install_dependencies(server_id, dir, env, &self.toolchain, sink, &mut stop_rx)
            .await?;

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .current_dir(dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let (mut child, pid) = {
            let mut map = self.inner.lock().await;
            let Some(entry) = map.get_mut(handle) else {
                return Err(RunnerError::Cancelled {
                    server_id: server_id.clone(),
                });
            };
            if entry.state != ProcessState::Starting {
                return Err(RunnerError::Cancelled {
                    server_id: server_id.clone(),
                });
            }

            let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
                server_id: server_id.clone(),
                program: plan.program.clone(),
                source,
            })?;
            let pid = child.id();
            entry.pid = pid;
            entry.pgid = pid.map(|p| p as i32);
            entry.state = ProcessState::Running;
            entry.message = None;
            (child, pid)
        };

        tracing::info!(
            server_id = %server_id,
            handle = %handle,
            pid = pid.unwrap_or_default(),
            command = %plan.command_line(),
            "process spawned"
        );
        if let Some(pid) = pid {
            sink.emit(format!("Process started (pid {pid})")).await;
        }

        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            let sink = sink.clone();
            pumps.push(tokio::spawn(async move { sink.pump(out, LogTag::Stdout).await }));
        }
        if let Some(err) = child.stderr.take() {
            let sink = sink.clone();
            pumps.push(tokio::spawn(async move { sink.pump(err, LogTag::Stderr).await }));
        }

        let registry = self.clone();
        let handle = handle.clone();
        let server_id = server_id.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let res = tokio::select! {
                res = child.wait() => res,
                _ = stop_requested(&mut stop_rx) => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            // Let buffered output land before the exit notice. A pipe still
            // held open by a leftover grandchild is cut off.
            let drain_deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
            for mut p in pumps {
                if tokio::time::timeout_at(drain_deadline, &mut p).await.is_err() {
                    p.abort();
                    let _ = p.await;
                }
            }

            let requested_stop = registry
                .inner
                .lock()
                .await
                .remove(&handle)
                .is_some_and(|e| e.state == ProcessState::Stopping);

            let (state, exit_code, line) = match res {
                Ok(status) => {
                    let state = if requested_stop || status.success() {
                        ProcessState::Stopped
                    } else {
                        ProcessState::Crashed
                    };
                    (state, status.code(), describe_exit(&status))
                }
                Err(err) => (
                    ProcessState::Crashed,
                    None,
                    format!("Process wait failed: {err}"),
                ),
            };

            tracing::info!(
                server_id = %server_id,
                handle = %handle,
                ?state,
                ?exit_code,
                "process exited"
            );
            sink.emit(line).await;

            let _ = registry.events.send(LifecycleEvent {
                handle,
                server_id,
                state,
                exit_code,
            });
        });

        Ok(())
    }

    /// Terminates the process behind `handle`: SIGTERM to its process group,
    /// then SIGKILL once `timeout` passes. A reservation that is still
    /// installing has its install killed and its start cancelled.
    pub async fn stop(&self, handle: &HandleId, timeout: Duration) -> StopOutcome {
        let (pgid, sink) = {
            let mut map = self.inner.lock().await;
            let Some(e) = map.get_mut(handle) else {
                return StopOutcome::NotFound;
            };
            e.state = ProcessState::Stopping;
            e.message = Some("stopping".to_string());
            (e.pgid, e.sink.clone())
        };

        sink.emit("Stopping process...").await;

        match pgid {
            #[cfg(unix)]
            Some(pgid) => crate::support::signal_group(pgid, libc::SIGTERM),
            _ => {
                self.send_kill(handle).await;
            }
        }

        if self.wait_gone(handle, timeout).await {
            return StopOutcome::Stopped;
        }

        let killed = self.send_kill(handle).await;
        #[cfg(unix)]
        if let Some(pgid) = pgid {
            crate::support::signal_group(pgid, libc::SIGKILL);
        }
        if killed {
            tracing::warn!(handle = %handle, "process ignored SIGTERM, killed");
            sink.emit(format!(
                "Process did not exit within {}ms, killed",
                timeout.as_millis()
            ))
            .await;
        }

        if self.wait_gone(handle, KILL_CONFIRM_TIMEOUT).await {
            StopOutcome::Stopped
        } else {
            tracing::error!(handle = %handle, "process still registered after SIGKILL");
            StopOutcome::Unconfirmed
        }
    }

    /// Stops every registered process. Used on service shutdown.
    pub async fn shutdown_all(&self, timeout: Duration) {
        let handles: Vec<HandleId> = self.inner.lock().await.keys().cloned().collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for h in handles {
            let registry = self.clone();
            tasks.push(tokio::spawn(async move { registry.stop(&h, timeout).await }));
        }
        for t in tasks {
            let _ = t.await;
        }
    }

    /// Raises the stop flag; `false` when the handle is unknown or nothing
    /// is waiting on it any more.
    async fn send_kill(&self, handle: &HandleId) -> bool {
        self.inner
            .lock()
            .await
            .get(handle)
            .is_some_and(|e| e.stop_tx.send(true).is_ok())
    }

    async fn wait_gone(&self, handle: &HandleId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.contains(handle).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
