//! Logging setup, build info and store health.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::db::DbState;
use crate::error::PosResult;
use crate::store;

pub const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "restaurant";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// One JSON object per event, structured fields under `fields`.
fn json_file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_current_span(false)
}

/// Install console and daily rolling JSON file logging under `log_dir`.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// for the life of the process; dropping it flushes and stops file output.
pub fn init_tracing(log_dir: &Path) -> PosResult<WorkerGuard> {
    fs::create_dir_all(log_dir)?;
    prune_old_logs(log_dir);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,restaurant_pos=debug"));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true);

    // A second call (tests, embedding hosts) keeps the first subscriber.
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(json_file_layer(non_blocking))
        .try_init()
        .is_err()
    {
        warn!("tracing subscriber already installed");
    }

    info!("Starting restaurant-pos v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

/// Keep only the newest `MAX_LOG_FILES` log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Build info and health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        git_sha: env!("BUILD_GIT_SHA"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub schema_version: i32,
    pub db_path: String,
    pub db_size_bytes: u64,
    pub collections: Vec<(String, i64)>,
}

pub fn store_health(db: &DbState) -> PosResult<StoreHealth> {
    let conn = db.conn.lock()?;
    let schema_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    let collections = store::collection_counts(&conn)?;
    let db_size_bytes = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);
    Ok(StoreHealth {
        schema_version,
        db_path: db.db_path.display().to_string(),
        db_size_bytes,
        collections,
    })
}
