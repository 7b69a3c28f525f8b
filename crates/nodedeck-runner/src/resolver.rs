use std::path::Path;

use serde::Deserialize;

use crate::error::RunnerError;
use crate::support::env_string;

pub const MANIFEST_FILE: &str = "package.json";

/// Conventional entry files, in priority order.
pub const FALLBACK_ENTRY_FILES: [&str; 5] = ["index.js", "main.js", "app.js", "server.js", "bot.js"];

/// Programs used to install and launch projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub node: String,
    pub npm: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            npm: "npm".to_string(),
        }
    }
}

impl Toolchain {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            node: env_string("NODEDECK_NODE_BIN").unwrap_or(d.node),
            npm: env_string("NODEDECK_NPM_BIN").unwrap_or(d.npm),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    StartScript,
    MainFile(String),
    Fallback(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub entry: EntryPoint,
}

impl LaunchPlan {
    pub fn command_line(&self) -> String {
        let mut out = self.program.clone();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    scripts: std::collections::BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    fn has_start_script(&self) -> bool {
        self.scripts
            .get("start")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty())
    }
}

fn read_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = match std::fs::read(&path) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to read manifest");
            return None;
        }
    };
    match serde_json::from_slice::<Manifest>(&raw) {
        Ok(m) => Some(m),
        Err(err) => {
            // Unparsable manifests fall through to the file-name heuristics.
            tracing::warn!(path = %path.display(), %err, "ignoring invalid manifest");
            None
        }
    }
}

fn normalize_main(main: &str) -> &str {
    main.trim().trim_start_matches("./")
}

/// Picks the command that launches the project in `dir`.
///
/// `files` is the listing of `dir` (plain file names, top level only).
pub fn resolve(dir: &Path, files: &[String], toolchain: &Toolchain) -> Result<LaunchPlan, RunnerError> {
    let has = |name: &str| files.iter().any(|f| f == name);

    if has(MANIFEST_FILE)
        && let Some(manifest) = read_manifest(dir)
    {
        if manifest.has_start_script() {
            return Ok(LaunchPlan {
                program: toolchain.npm.clone(),
                args: vec!["start".to_string()],
                entry: EntryPoint::StartScript,
            });
        }

        if let Some(main) = manifest.main.as_deref().map(normalize_main)
            && !main.is_empty()
            && has(main)
        {
            return Ok(LaunchPlan {
                program: toolchain.node.clone(),
                args: vec![main.to_string()],
                entry: EntryPoint::MainFile(main.to_string()),
            });
        }
    }

    FALLBACK_ENTRY_FILES
        .iter()
        .find(|f| has(**f))
        .map(|f| LaunchPlan {
            program: toolchain.node.clone(),
            args: vec![f.to_string()],
            entry: EntryPoint::Fallback(f.to_string()),
        })
        .ok_or_else(|| RunnerError::NoEntryPoint {
            dir: dir.to_path_buf(),
        })
}
