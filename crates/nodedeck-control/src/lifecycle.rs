use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use nodedeck_db::entities::servers;
use nodedeck_process::{HandleId, LifecycleEvent, ServerId, ServerStatus};
use nodedeck_runner::{
    LogHub, ProcessRegistry, RunnerError, StopOutcome,
    project_fs::{self, FileEntry, FsError},
};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};

use crate::config::Config;
use crate::error::ApiError;
use crate::store::{NewServer, ServerStore, env_map};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Default)]
pub struct UpdateServer {
    pub name: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
}

fn server_key(id: &str) -> String {
    format!("server:{id}")
}

fn owner_key(owner_id: &str) -> String {
    format!("owner:{owner_id}")
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_env(env: &BTreeMap<String, String>) -> Result<(), ApiError> {
    for (k, v) in env {
        if k.is_empty() || k.contains('=') || k.contains('\0') {
            return Err(ApiError::BadRequest(format!(
                "invalid environment variable name: {k:?}"
            )));
        }
        if v.contains('\0') {
            return Err(ApiError::BadRequest(format!(
                "environment variable {k} contains a NUL byte"
            )));
        }
    }
    Ok(())
}

/// Ties server records to the process registry.
///
/// Every mutation of one server runs under that server's lock, and so does
/// reconciliation of exit events. A start holds the lock only to reserve the
/// server and record its handle; install and spawn run unlocked so a stop or
/// delete can cancel them.
#[derive(Clone)]
pub struct Lifecycle {
    store: ServerStore,
    registry: ProcessRegistry,
    hub: LogHub,
    data_root: PathBuf,
    max_servers: usize,
    stop_timeout: Duration,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Lifecycle {
    pub fn new(store: ServerStore, registry: ProcessRegistry, hub: LogHub, config: &Config) -> Self {
        Self {
            store,
            registry,
            hub,
            data_root: config.data_root.clone(),
            max_servers: config.max_servers_per_user,
            stop_timeout: config.stop_timeout,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let m = {
            let mut locks = self.locks.lock().await;
            // Only the map holds an idle entry.
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(key).or_default().clone()
        };
        m.lock_owned().await
    }

    /// A record owned by someone else is reported as missing.
    pub async fn get_owned(&self, owner_id: &str, id: &str) -> Result<servers::Model, ApiError> {
        self.store
            .get(id)
            .await?
            .filter(|m| m.owner_id == owner_id)
            .ok_or(ApiError::NotFound("server"))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<servers::Model>, ApiError> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    pub async fn create_server(
        &self,
        owner_id: &str,
        name: &str,
        env: BTreeMap<String, String>,
    ) -> Result<servers::Model, ApiError> {
        let name = validate_name(name)?;
        validate_env(&env)?;

        let _guard = self.lock(owner_key(owner_id)).await;
        let count = self.store.count_by_owner(owner_id).await?;
        if count >= self.max_servers as u64 {
            return Err(ApiError::BadRequest(format!(
                "server limit reached ({} per user)",
                self.max_servers
            )));
        }

        let id = ServerId::new();
        let root = project_fs::server_root(&self.data_root, &id);
        tokio::fs::create_dir_all(&root).await.map_err(FsError::Io)?;

        let created = self
            .store
            .create(NewServer {
                id: id.clone(),
                name,
                owner_id: owner_id.to_string(),
                root_path: root.to_string_lossy().into_owned(),
                env,
            })
            .await;
        match created {
            Ok(model) => {
                tracing::info!(server_id = %id, owner_id, "server created");
                Ok(model)
            }
            Err(err) => {
                let _ = project_fs::remove_root(&root).await;
                Err(err.into())
            }
        }
    }

    pub async fn update_server(
        &self,
        owner_id: &str,
        id: &str,
        input: UpdateServer,
    ) -> Result<servers::Model, ApiError> {
        let name = input.name.as_deref().map(validate_name).transpose()?;
        if let Some(env) = &input.env {
            validate_env(env)?;
        }

        let _guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;
        Ok(self.store.update(model, name, input.env.as_ref()).await?)
    }

    pub async fn start_server(&self, owner_id: &str, id: &str) -> Result<servers::Model, ApiError> {
        let guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;
        self.start_from(guard, model).await
    }

    pub async fn stop_server(&self, owner_id: &str, id: &str) -> Result<servers::Model, ApiError> {
        let _guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;
        self.stop_locked(model).await
    }

    pub async fn restart_server(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<servers::Model, ApiError> {
        let guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;
        let model = self.stop_locked(model).await?;
        self.start_from(guard, model).await
    }

    /// Stops the process, removes the project tree and the record.
    pub async fn delete_server(&self, owner_id: &str, id: &str) -> Result<(), ApiError> {
        let _guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;

        let server_id = ServerId(model.id.clone());
        if let Some(handle) = self.registry.handle_for_server(&server_id).await {
            self.stop_process(&server_id, &handle).await?;
        }
        project_fs::remove_root(Path::new(&model.root_path))
            .await
            .map_err(FsError::Io)?;
        self.store.delete(&model.id).await?;
        tracing::info!(server_id = %server_id, owner_id, "server deleted");
        Ok(())
    }

    /// Replaces the project tree with the zip in `body`. The server must not
    /// have a live process.
    pub async fn upload_project(
        &self,
        owner_id: &str,
        id: &str,
        body: &[u8],
    ) -> Result<usize, ApiError> {
        if body.is_empty() {
            return Err(ApiError::BadRequest("empty upload".to_string()));
        }

        let _guard = self.lock(server_key(id)).await;
        let model = self.get_owned(owner_id, id).await?;
        let server_id = ServerId(model.id.clone());
        if self.registry.handle_for_server(&server_id).await.is_some() {
            return Err(ApiError::Conflict(
                "stop the server before uploading a new project".to_string(),
            ));
        }

        let files = project_fs::install_upload(
            &self.data_root,
            &server_id,
            body,
            Path::new(&model.root_path),
        )
        .await?;
        self.hub
            .sink(server_id.as_str())
            .emit(format!("Project uploaded ({files} files)"))
            .await;
        Ok(files)
    }

    pub async fn list_files(
        &self,
        owner_id: &str,
        id: &str,
        rel: &str,
    ) -> Result<Vec<FileEntry>, ApiError> {
        let model = self.get_owned(owner_id, id).await?;
        let dir = project_fs::scoped(Path::new(&model.root_path), rel)?;
        Ok(project_fs::list_entries(&dir).await?)
    }

    pub async fn move_file(
        &self,
        owner_id: &str,
        id: &str,
        from: &str,
        to: &str,
    ) -> Result<PathBuf, ApiError> {
        let model = self.get_owned(owner_id, id).await?;
        Ok(project_fs::move_entry(Path::new(&model.root_path), from, to).await?)
    }

    pub async fn delete_file(&self, owner_id: &str, id: &str, rel: &str) -> Result<(), ApiError> {
        let model = self.get_owned(owner_id, id).await?;
        Ok(project_fs::delete_entry(Path::new(&model.root_path), rel).await?)
    }

    /// Reserves the server and records its handle while `guard` is held, then
    /// installs and spawns with the lock released.
    async fn start_from(
        &self,
        guard: OwnedMutexGuard<()>,
        model: servers::Model,
    ) -> Result<servers::Model, ApiError> {
        let server_id = ServerId(model.id.clone());
        let dir = PathBuf::from(&model.root_path);
        tokio::fs::create_dir_all(&dir).await.map_err(FsError::Io)?;
        let env = env_map(&model);

        let reservation = match self
            .registry
            .reserve(&server_id, self.hub.sink(server_id.as_str()))
            .await
        {
            Ok(r) => r,
            Err(RunnerError::AlreadyActive { handle, .. }) => {
                return Err(ApiError::Conflict(format!(
                    "server is already running ({handle})"
                )));
            }
            Err(err) => return Err(err.into()),
        };
        let handle = reservation.handle().clone();

        // The handle on the record marks the start in flight; exits and the
        // boot sweep settle it like any other.
        match self
            .store
            .set_runtime(&model.id, ServerStatus::Running, Some(&handle))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                reservation.release().await;
                return Err(ApiError::NotFound("server"));
            }
            Err(err) => {
                reservation.release().await;
                return Err(err.into());
            }
        }
        drop(guard);

        let launched = reservation.launch(&dir, &env).await;

        let _guard = self.lock(server_key(&model.id)).await;
        match launched {
            Ok(handle) => {
                tracing::info!(server_id = %server_id, handle = %handle, "server started");
                self.store
                    .get(&model.id)
                    .await?
                    .ok_or(ApiError::NotFound("server"))
            }
            Err(err) => {
                let status = match err {
                    RunnerError::Cancelled { .. } => ServerStatus::Stopped,
                    _ => ServerStatus::Error,
                };
                self.store.settle_exit(&model.id, &handle, status).await?;
                Err(err.into())
            }
        }
    }

    async fn stop_locked(&self, model: servers::Model) -> Result<servers::Model, ApiError> {
        let server_id = ServerId(model.id.clone());
        if let Some(handle) = self.registry.handle_for_server(&server_id).await {
            self.stop_process(&server_id, &handle).await?;
        }
        self.store
            .set_runtime(&model.id, ServerStatus::Stopped, None)
            .await?
            .ok_or(ApiError::NotFound("server"))
    }

    /// Fails when the exit cannot be confirmed; the record keeps its handle.
    async fn stop_process(&self, server_id: &ServerId, handle: &HandleId) -> Result<(), ApiError> {
        match self.registry.stop(handle, self.stop_timeout).await {
            StopOutcome::Unconfirmed => Err(ApiError::Internal(format!(
                "process {handle} did not exit after SIGKILL"
            ))),
            StopOutcome::Stopped | StopOutcome::NotFound => {
                tracing::info!(server_id = %server_id, handle = %handle, "server stopped");
                Ok(())
            }
        }
    }

    async fn reconcile(&self, ev: LifecycleEvent) {
        let _guard = self.lock(server_key(ev.server_id.as_str())).await;
        let status = ServerStatus::from_exit(ev.state);
        match self
            .store
            .settle_exit(ev.server_id.as_str(), &ev.handle, status)
            .await
        {
            Ok(true) => tracing::info!(
                server_id = %ev.server_id,
                handle = %ev.handle,
                %status,
                exit_code = ?ev.exit_code,
                "server status reconciled after exit"
            ),
            Ok(false) => {}
            Err(err) => tracing::warn!(server_id = %ev.server_id, %err, "failed to reconcile exit"),
        }
    }

    /// Applies every process exit to the owning record.
    pub fn spawn_reconciler(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.registry.subscribe_events();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let this = this.clone();
                        tokio::spawn(async move { this.reconcile(ev).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "lifecycle events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// The registry starts empty, so records left `running` by a previous run
    /// are stale.
    pub async fn reset_stale_on_boot(&self) -> Result<u64, ApiError> {
        let n = self.store.reset_running_to_stopped().await?;
        if n > 0 {
            tracing::info!(count = n, "reset stale running servers");
        }
        Ok(n)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::test_support::{setup, setup_with, zip_with, zip_with_bot};
    use nodedeck_process::{LogEnvelope, ProcessState};
    use nodedeck_runner::Subscription;

    async fn wait_for_line(sub: &mut Subscription, wanted: &str) -> bool {
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(frame) = sub.rx.recv().await {
                let env: LogEnvelope = serde_json::from_str(&frame).unwrap();
                if env.message == wanted {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    async fn wait_for_status(state: &AppState, id: &str, wanted: &str) -> servers::Model {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let m = state.lifecycle.store.get(id).await.unwrap().unwrap();
            if m.status == wanted || tokio::time::Instant::now() >= deadline {
                return m;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn upload_start_streams_output_and_caps_servers() {
        let (state, root) = setup("end-to-end").await;
        let lc = &state.lifecycle;

        let first = lc.create_server("alice", "bot", BTreeMap::new()).await.unwrap();
        assert_eq!(first.status, "stopped");
        lc.create_server("alice", "two", BTreeMap::new()).await.unwrap();
        lc.create_server("alice", "three", BTreeMap::new()).await.unwrap();
        let err = lc
            .create_server("alice", "four", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        lc.create_server("bob", "other", BTreeMap::new()).await.unwrap();

        let files = lc
            .upload_project("alice", &first.id, &zip_with_bot("echo hi\nsleep 5\n"))
            .await
            .unwrap();
        assert_eq!(files, 1);

        let mut sub = state.hub.subscribe(&first.id).await;
        let started = lc.start_server("alice", &first.id).await.unwrap();
        assert_eq!(started.status, "running");
        assert!(started.process_id.is_some());

        assert!(wait_for_line(&mut sub, "[stdout] hi").await);

        let stopped = lc.stop_server("alice", &first.id).await.unwrap();
        assert_eq!(stopped.status, "stopped");
        assert_eq!(stopped.process_id, None);
        assert!(state.registry.list().await.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn crash_is_reconciled_to_error() {
        let (state, root) = setup("crash").await;
        let lc = &state.lifecycle;
        let reconciler = lc.spawn_reconciler();

        let m = lc.create_server("alice", "crashy", BTreeMap::new()).await.unwrap();
        lc.upload_project("alice", &m.id, &zip_with_bot("exit 3\n"))
            .await
            .unwrap();
        lc.start_server("alice", &m.id).await.unwrap();

        let settled = wait_for_status(&state, &m.id, "error").await;
        assert_eq!(settled.status, "error");
        assert_eq!(settled.process_id, None);

        reconciler.abort();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn clean_exit_is_reconciled_to_stopped() {
        let (state, root) = setup("clean-exit").await;
        let lc = &state.lifecycle;
        let reconciler = lc.spawn_reconciler();

        let m = lc.create_server("alice", "oneshot", BTreeMap::new()).await.unwrap();
        lc.upload_project("alice", &m.id, &zip_with_bot("echo done\n"))
            .await
            .unwrap();
        let started = lc.start_server("alice", &m.id).await.unwrap();
        assert!(started.process_id.is_some());

        let settled = wait_for_status(&state, &m.id, "stopped").await;
        assert_eq!(settled.status, "stopped");
        assert_eq!(settled.process_id, None);

        reconciler.abort();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn start_without_entry_point_marks_error() {
        let (state, root) = setup("no-entry").await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "empty", BTreeMap::new()).await.unwrap();
        let err = lc.start_server("alice", &m.id).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Runner(RunnerError::NoEntryPoint { .. })
        ));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let m = lc.get_owned("alice", &m.id).await.unwrap();
        assert_eq!(m.status, "error");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn other_owners_see_not_found() {
        let (state, root) = setup("ownership").await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "mine", BTreeMap::new()).await.unwrap();
        assert!(matches!(
            lc.get_owned("bob", &m.id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            lc.stop_server("bob", &m.id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(lc.list("bob").await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn boot_sweep_resets_running_records() {
        let (state, root) = setup("boot-sweep").await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "ghost", BTreeMap::new()).await.unwrap();
        let ghost = HandleId(format!("{}-1", m.id));
        lc.store
            .set_runtime(&m.id, ServerStatus::Running, Some(&ghost))
            .await
            .unwrap();

        assert_eq!(lc.reset_stale_on_boot().await.unwrap(), 1);
        let m = lc.get_owned("alice", &m.id).await.unwrap();
        assert_eq!(m.status, "stopped");
        assert_eq!(m.process_id, None);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn upload_is_refused_while_running_and_delete_cascades() {
        let (state, root) = setup("delete").await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "doomed", BTreeMap::new()).await.unwrap();
        let body = zip_with_bot("sleep 30\n");
        lc.upload_project("alice", &m.id, &body).await.unwrap();
        lc.start_server("alice", &m.id).await.unwrap();

        assert!(matches!(
            lc.upload_project("alice", &m.id, &body).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            lc.start_server("alice", &m.id).await,
            Err(ApiError::Conflict(_))
        ));

        lc.delete_server("alice", &m.id).await.unwrap();
        assert!(state.registry.list().await.is_empty());
        assert!(!Path::new(&m.root_path).exists());
        assert!(matches!(
            lc.get_owned("alice", &m.id).await,
            Err(ApiError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn update_validates_and_persists_env() {
        let (state, root) = setup("update").await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "bot", BTreeMap::new()).await.unwrap();
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "abc".to_string());
        let updated = lc
            .update_server(
                "alice",
                &m.id,
                UpdateServer {
                    name: Some("  renamed ".to_string()),
                    env: Some(env.clone()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(env_map(&updated), env);

        let mut bad = BTreeMap::new();
        bad.insert("A=B".to_string(), "x".to_string());
        assert!(matches!(
            lc.update_server(
                "alice",
                &m.id,
                UpdateServer {
                    name: None,
                    env: Some(bad)
                }
            )
            .await,
            Err(ApiError::BadRequest(_))
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stop_cancels_a_start_stuck_in_install() {
        // `sh install` runs the archived `install` file as the package manager.
        let (state, root) = setup_with("slow-install", "sh", Duration::from_secs(5)).await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "slow", BTreeMap::new()).await.unwrap();
        let body = zip_with(&[
            ("package.json", "{}"),
            ("install", "sleep 20\n"),
            ("bot.js", "echo never\n"),
        ]);
        lc.upload_project("alice", &m.id, &body).await.unwrap();

        let start = {
            let lc = lc.clone();
            let id = m.id.clone();
            tokio::spawn(async move { lc.start_server("alice", &id).await })
        };

        let server_id = ServerId(m.id.clone());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while state.registry.handle_for_server(&server_id).await.is_none() {
            assert!(tokio::time::Instant::now() < deadline, "start never reserved");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stopped = tokio::time::timeout(
            Duration::from_secs(8),
            lc.stop_server("alice", &m.id),
        )
        .await
        .expect("stop is not held up by the install")
        .unwrap();
        assert_eq!(stopped.status, "stopped");
        assert_eq!(stopped.process_id, None);

        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ApiError::Runner(RunnerError::Cancelled { .. })
        ));
        let m = lc.get_owned("alice", &m.id).await.unwrap();
        assert_eq!(m.status, "stopped");
        assert!(state.registry.list().await.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unconfirmed_stop_keeps_the_record_running() {
        let (state, root) = setup_with("unconfirmed", "false", Duration::from_millis(100)).await;
        let lc = &state.lifecycle;

        let m = lc.create_server("alice", "held", BTreeMap::new()).await.unwrap();
        // A reservation nobody launches never answers the stop.
        let reservation = state
            .registry
            .reserve(&ServerId(m.id.clone()), state.hub.sink(m.id.as_str()))
            .await
            .unwrap();
        let handle = reservation.handle().clone();
        lc.store
            .set_runtime(&m.id, ServerStatus::Running, Some(&handle))
            .await
            .unwrap();

        let err = lc.stop_server("alice", &m.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let kept = lc.get_owned("alice", &m.id).await.unwrap();
        assert_eq!(kept.status, "running");
        assert_eq!(kept.process_id.as_deref(), Some(handle.as_str()));
        assert!(matches!(
            lc.delete_server("alice", &m.id).await,
            Err(ApiError::Internal(_))
        ));

        reservation.release().await;
        let stopped = lc.stop_server("alice", &m.id).await.unwrap();
        assert_eq!(stopped.status, "stopped");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let (state, root) = setup("locks").await;
        let lc = &state.lifecycle;

        let a = lc.create_server("alice", "a", BTreeMap::new()).await.unwrap();
        lc.create_server("bob", "b", BTreeMap::new()).await.unwrap();
        lc.update_server("alice", &a.id, UpdateServer::default())
            .await
            .unwrap();
        lc.delete_server("alice", &a.id).await.unwrap();
        // A late exit event for the deleted server.
        lc.reconcile(LifecycleEvent {
            handle: HandleId(format!("{}-1", a.id)),
            server_id: ServerId(a.id.clone()),
            state: ProcessState::Stopped,
            exit_code: Some(0),
        })
        .await;

        let _held = lc.lock(server_key("other")).await;
        assert_eq!(lc.locks.lock().await.len(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }
}
