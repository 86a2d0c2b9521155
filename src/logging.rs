// src/logging.rs
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "COURIER_LOG_FORMAT";
pub const LOG_FILE_PREFIX: &str = "courier";
const DEFAULT_FILTER: &str = "feed_courier=info,warn";

/// Keeps the file writer flushing; drop it last.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Console logging (compact, or JSON with `COURIER_LOG_FORMAT=json`), plus a
/// daily file under `log_dir` when one is configured.
pub fn init(log_dir: Option<&Path>) -> Result<LogGuard> {
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .build(dir)
                .context("building log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_filter(env_filter())))
        .with((!json).then(|| fmt::layer().compact().with_filter(env_filter())))
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

/// Delete `courier.*` log files in `dir` last modified before `now - max_age`.
/// Returns the number of files removed.
pub fn prune_log_dir(dir: &Path, max_age: Duration, now: SystemTime) -> std::io::Result<usize> {
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Ok(0);
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let is_ours = name
            .to_str()
            .is_some_and(|n| n.starts_with(&format!("{LOG_FILE_PREFIX}.")));
        if !is_ours {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        if meta.modified()? < cutoff {
            std::fs::remove_file(entry.path())?;
            tracing::debug!(file = ?name, "removed old log file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_only_touches_old_courier_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("courier.2025-01-01.log"), "old").unwrap();
        std::fs::write(dir.path().join("other.log"), "keep").unwrap();

        // everything was just written, so a 1h horizon keeps all
        let n = prune_log_dir(dir.path(), Duration::from_secs(3600), SystemTime::now()).unwrap();
        assert_eq!(n, 0);

        // pretend it is two days later
        let later = SystemTime::now() + Duration::from_secs(2 * 86_400);
        let n = prune_log_dir(dir.path(), Duration::from_secs(86_400), later).unwrap();
        assert_eq!(n, 1);
        assert!(dir.path().join("other.log").exists());
        assert!(!dir.path().join("courier.2025-01-01.log").exists());
    }

    #[test]
    fn missing_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert_eq!(prune_log_dir(&gone, Duration::from_secs(1), SystemTime::now()).unwrap(), 0);
    }
}
