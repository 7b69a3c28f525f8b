use std::{
    io::{Cursor, Write},
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use nodedeck_runner::{Toolchain, support::unix_millis};
use sea_orm_migration::MigratorTrait;

use crate::config::Config;
use crate::state::AppState;

pub fn temp_dir_for(test_name: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "nodedeck-control-{test_name}-{}-{n}-{}",
        std::process::id(),
        unix_millis()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// App state over a fresh SQLite file. `sh` runs the shell scripts written as
/// `bot.js`; `npm` is whatever stands in for the package manager.
pub async fn setup_with(test_name: &str, npm: &str, stop_timeout: Duration) -> (AppState, PathBuf) {
    let root = temp_dir_for(test_name);
    let url = format!("sqlite://{}?mode=rwc", root.join("db.sqlite").display());
    let db = nodedeck_db::connect(&url).await.unwrap();
    nodedeck_migration::Migrator::up(&db, None).await.unwrap();

    let config = Config {
        data_root: root.join("data"),
        jwt_secret: b"test-secret".to_vec(),
        stop_timeout,
        log_queue: 64,
        toolchain: Toolchain {
            node: "sh".to_string(),
            npm: npm.to_string(),
        },
        ..Config::default()
    };
    (AppState::new(config, db), root)
}

pub async fn setup(test_name: &str) -> (AppState, PathBuf) {
    setup_with(test_name, "false", Duration::from_secs(5)).await
}

pub fn zip_with(files: &[(&str, &str)]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in files {
        w.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        w.write_all(body.as_bytes()).unwrap();
    }
    w.finish().unwrap().into_inner()
}

pub fn zip_with_bot(script: &str) -> Vec<u8> {
    zip_with(&[("bot.js", script)])
}
