use std::path::PathBuf;

use nodedeck_process::{HandleId, ServerId};

/// Failures of the start/stop pipeline, one variant per phase.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("no entry point found in {}", dir.display())]
    NoEntryPoint { dir: PathBuf },

    #[error("dependency install failed for server {server_id} (exit code {})", display_code(*code))]
    InstallFailed {
        server_id: ServerId,
        code: Option<i32>,
    },

    #[error("dependency install timed out for server {server_id} after {secs}s")]
    InstallTimedOut { server_id: ServerId, secs: u64 },

    #[error("failed to spawn `{program}` for server {server_id}: {source}")]
    Spawn {
        server_id: ServerId,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server {server_id} already has an active process ({handle})")]
    AlreadyActive { server_id: ServerId, handle: HandleId },

    #[error("start of server {server_id} was cancelled by a stop request")]
    Cancelled { server_id: ServerId },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Resolution problems are caused by the uploaded project, not by the host.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NoEntryPoint { .. } | Self::AlreadyActive { .. } | Self::Cancelled { .. }
        )
    }
}

fn display_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}
