use std::{fmt, str::FromStr};

/// Identifier of a persisted server record. Also used as the log broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry key of a live child process: `<server id>-<unix millis at spawn>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HandleId(pub String);

impl HandleId {
    pub fn for_spawn(server_id: &ServerId, unix_ms: u64) -> Self {
        Self(format!("{}-{}", server_id.0, unix_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl ProcessState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Status stored on the server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Running,
    Error,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    /// Persisted status after a process left the registry in `state`.
    pub fn from_exit(state: ProcessState) -> Self {
        match state {
            ProcessState::Crashed => Self::Error,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping => {
                Self::Running
            }
            ProcessState::Stopped => Self::Stopped,
        }
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessStatus {
    pub handle: HandleId,
    pub server_id: ServerId,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

/// Published by the registry whenever a handle reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub handle: HandleId,
    pub server_id: ServerId,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Npm,
    Stdout,
    Stderr,
}

impl LogTag {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Npm => "[npm] ",
            Self::Stdout => "[stdout] ",
            Self::Stderr => "[stderr] ",
        }
    }

    pub fn tag(self, line: &str) -> String {
        format!("{}{line}", self.prefix())
    }
}

/// Unit sent over a log connection: `{ "type": "log", "timestamp": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub message: String,
}

impl LogEnvelope {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            kind: "log".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"type\":\"log\",\"timestamp\":\"{}\",\"message\":\"\"}}",
                self.timestamp
            )
        })
    }
}
