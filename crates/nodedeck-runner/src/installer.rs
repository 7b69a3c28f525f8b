use std::{collections::BTreeMap, path::Path, process::Stdio, time::Duration};

use nodedeck_process::{LogTag, ServerId};
use tokio::{
    process::{Child, Command},
    sync::watch,
};

use crate::error::RunnerError;
use crate::log_hub::LogSink;
use crate::resolver::{MANIFEST_FILE, Toolchain};
use crate::support::{install_timeout, own_process_group, stop_requested};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No manifest, nothing to install.
    Skipped,
    Installed,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Stopped,
}

/// Runs `npm install` in `dir` when it carries a manifest, streaming its output
/// to `sink` with the `[npm] ` tag.
///
/// Raising `stop` kills the whole install process group and yields
/// [`RunnerError::Cancelled`].
pub async fn install_dependencies(
    server_id: &ServerId,
    dir: &Path,
    env: &BTreeMap<String, String>,
    toolchain: &Toolchain,
    sink: &LogSink,
    stop: &mut watch::Receiver<bool>,
) -> Result<InstallOutcome, RunnerError> {
    if !tokio::fs::try_exists(dir.join(MANIFEST_FILE))
        .await
        .unwrap_or(false)
    {
        return Ok(InstallOutcome::Skipped);
    }

    sink.emit("Installing dependencies...").await;
    tracing::info!(server_id = %server_id, dir = %dir.display(), "running dependency install");

    let mut cmd = Command::new(&toolchain.npm);
    cmd.arg("install")
        .current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        server_id: server_id.clone(),
        program: format!("{} install", toolchain.npm),
        source,
    })?;
    let pgid = child.id().map(|p| p as i32);

    let mut pumps = Vec::new();
    if let Some(out) = child.stdout.take() {
        let sink = sink.clone();
        pumps.push(tokio::spawn(async move { sink.pump(out, LogTag::Npm).await }));
    }
    if let Some(err) = child.stderr.take() {
        let sink = sink.clone();
        pumps.push(tokio::spawn(async move { sink.pump(err, LogTag::Npm).await }));
    }

    let limit = install_timeout();
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let waited = tokio::select! {
        res = child.wait() => Waited::Exited(res),
        _ = deadline => Waited::TimedOut(limit.unwrap_or_default()),
        _ = stop_requested(stop) => Waited::Stopped,
    };

    let status = match waited {
        Waited::Exited(res) => res?,
        Waited::TimedOut(limit) => {
            kill_install(&mut child, pgid).await;
            for p in pumps {
                p.abort();
            }
            sink.emit(format!(
                "Dependency install timed out after {}s",
                limit.as_secs()
            ))
            .await;
            return Err(RunnerError::InstallTimedOut {
                server_id: server_id.clone(),
                secs: limit.as_secs(),
            });
        }
        Waited::Stopped => {
            kill_install(&mut child, pgid).await;
            for p in pumps {
                p.abort();
            }
            tracing::info!(server_id = %server_id, "dependency install cancelled");
            sink.emit("Dependency install cancelled").await;
            return Err(RunnerError::Cancelled {
                server_id: server_id.clone(),
            });
        }
    };

    for p in pumps {
        let _ = p.await;
    }

    if !status.success() {
        sink.emit(format!(
            "Dependency install failed with code {}",
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        ))
        .await;
        return Err(RunnerError::InstallFailed {
            server_id: server_id.clone(),
            code: status.code(),
        });
    }

    sink.emit("Dependencies installed").await;
    Ok(InstallOutcome::Installed)
}

async fn kill_install(child: &mut Child, pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        crate::support::signal_group(pgid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
    let _ = child.kill().await;
}
