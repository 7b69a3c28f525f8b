use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::{process::Command, sync::watch};

const DEFAULT_LOG_QUEUE: usize = 256;

pub fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Per-subscriber queue capacity of the log hub.
pub fn log_queue_capacity() -> usize {
    env_usize("NODEDECK_LOG_QUEUE")
        .map(|v| v.clamp(8, 65_536))
        .unwrap_or(DEFAULT_LOG_QUEUE)
}

/// `None` means the install step may run forever.
pub fn install_timeout() -> Option<Duration> {
    env_u64("NODEDECK_INSTALL_TIMEOUT_SECS")
        .filter(|v| *v > 0)
        .map(|v| Duration::from_secs(v.min(24 * 60 * 60)))
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Resolves once the stop flag is raised. A dropped sender never resolves.
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // If the service dies, take the child down with it.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Runs the child in its own session so a group signal reaches grandchildren
/// (`npm start` -> node, `npm install` -> lifecycle scripts).
#[cfg(unix)]
pub(crate) fn own_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            set_parent_death_signal()?;
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
pub(crate) fn signal_group(pgid: i32, sig: libc::c_int) {
    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc == -1 {
        tracing::debug!(pgid, sig, err = %std::io::Error::last_os_error(), "signal process group failed");
    }
}
