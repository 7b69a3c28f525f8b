use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use nodedeck_runner::Toolchain;
use nodedeck_runner::support::{env_string, env_u64, env_usize, log_queue_capacity};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE_URL: &str = "sqlite://nodedeck.db?mode=rwc";
const DEFAULT_MAX_SERVERS: usize = 3;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database_url: String,
    pub data_root: PathBuf,
    pub admin_user: String,
    pub admin_pass: String,
    pub jwt_secret: Vec<u8>,
    pub max_servers_per_user: usize,
    pub max_upload_bytes: usize,
    pub stop_timeout: Duration,
    pub log_queue: usize,
    pub toolchain: Toolchain,
    pub log_dir: Option<PathBuf>,
}

fn random_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            data_root: PathBuf::from("./data"),
            admin_user: "admin".to_string(),
            admin_pass: "admin".to_string(),
            jwt_secret: random_secret(),
            max_servers_per_user: DEFAULT_MAX_SERVERS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            log_queue: log_queue_capacity(),
            toolchain: Toolchain::default(),
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();

        let bind = env_string("NODEDECK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid NODEDECK_BIND: {bind}"))?;

        let jwt_secret = env_string("NODEDECK_JWT_SECRET")
            .map(String::into_bytes)
            .unwrap_or(d.jwt_secret);

        Ok(Self {
            bind,
            database_url: env_string("DATABASE_URL").unwrap_or(d.database_url),
            data_root: env_string("NODEDECK_DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(d.data_root),
            admin_user: env_string("NODEDECK_ADMIN_USER").unwrap_or(d.admin_user),
            admin_pass: std::env::var("NODEDECK_ADMIN_PASS")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(d.admin_pass),
            jwt_secret,
            max_servers_per_user: env_usize("NODEDECK_MAX_SERVERS_PER_USER")
                .map(|v| v.clamp(1, 1000))
                .unwrap_or(d.max_servers_per_user),
            max_upload_bytes: env_usize("NODEDECK_MAX_UPLOAD_BYTES")
                .map(|v| v.max(1024))
                .unwrap_or(d.max_upload_bytes),
            stop_timeout: env_u64("NODEDECK_STOP_TIMEOUT_MS")
                .map(|v| Duration::from_millis(v.clamp(100, 10 * 60 * 1000)))
                .unwrap_or(d.stop_timeout),
            log_queue: d.log_queue,
            toolchain: Toolchain::from_env(),
            log_dir: env_string("NODEDECK_LOG_DIR").map(PathBuf::from),
        })
    }
}
