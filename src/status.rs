// src/status.rs
//! Persisted running totals, per-source state and recent errors, plus the
//! health verdict and the periodic status report built from them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::history::CompactionReport;
use crate::notify::format::escape_markdown_v2;
use crate::pipeline::{RunStatus, RunSummary};

/// Errors kept in the status file.
pub const MAX_RECENT_ERRORS: usize = 50;
/// Errors shown in a status report.
const REPORT_ERRORS: usize = 5;
const HIGH_ERROR_RATE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub last_checked: DateTime<Utc>,
    pub ok: bool,
    pub items: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusData {
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub partial_runs: u64,
    pub failed_runs: u64,
    pub skipped_triggers: u64,
    pub posts_sent: u64,
    pub sources: BTreeMap<String, SourceState>,
    pub errors: VecDeque<ErrorEntry>,
    pub last_summary: Option<RunSummary>,
    pub last_compaction: Option<DateTime<Utc>>,
    pub history_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Health {
    Unknown,
    Healthy,
    Unhealthy(String),
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Unknown => f.write_str("Unknown"),
            Health::Healthy => f.write_str("Healthy"),
            Health::Unhealthy(why) => write!(f, "Unhealthy - {why}"),
        }
    }
}

impl StatusData {
    /// "Too long ago" beats "high error rate" when both hold.
    pub fn health(&self, now: DateTime<Utc>, run_interval: Duration) -> Health {
        let Some(last) = self.last_run else {
            return Health::Unknown;
        };
        let limit = chrono::Duration::from_std(run_interval * 2).unwrap_or_else(|_| chrono::Duration::days(36_500));
        if now - last > limit {
            return Health::Unhealthy("last run too long ago".to_string());
        }
        if self.total_runs > 0 && self.failed_runs as f64 / self.total_runs as f64 > HIGH_ERROR_RATE {
            return Health::Unhealthy("high error rate".to_string());
        }
        Health::Healthy
    }

    fn push_error(&mut self, at: DateTime<Utc>, context: &str, message: &str) {
        self.errors.push_back(ErrorEntry {
            at,
            context: context.to_string(),
            message: message.to_string(),
        });
        while self.errors.len() > MAX_RECENT_ERRORS {
            self.errors.pop_front();
        }
    }
}

/// Shared, persisted status. Every mutation is written through to disk.
#[derive(Debug)]
pub struct StatusMonitor {
    path: Option<PathBuf>,
    run_interval: Duration,
    data: Mutex<StatusData>,
}

impl StatusMonitor {
    /// Load from `path`; a missing or unreadable file starts fresh.
    pub fn load(path: impl Into<PathBuf>, run_interval: Duration) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "status file unreadable, starting fresh");
                StatusData::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusData::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "status file unreadable, starting fresh");
                StatusData::default()
            }
        };
        Self {
            path: Some(path),
            run_interval,
            data: Mutex::new(data),
        }
    }

    /// Not persisted; for tests and dry runs.
    pub fn in_memory(run_interval: Duration) -> Self {
        Self {
            path: None,
            run_interval,
            data: Mutex::new(StatusData::default()),
        }
    }

    pub fn snapshot(&self) -> StatusData {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn health(&self, now: DateTime<Utc>) -> Health {
        self.snapshot().health(now, self.run_interval)
    }

    pub fn record_run(&self, summary: &RunSummary) {
        self.update(|d| {
            d.last_run = Some(summary.finished_at);
            d.total_runs += 1;
            match summary.status {
                RunStatus::Success => d.successful_runs += 1,
                RunStatus::Partial => d.partial_runs += 1,
                RunStatus::Failed => d.failed_runs += 1,
            }
            d.posts_sent += summary.delivered as u64;

            for s in &summary.sources {
                d.sources.insert(
                    s.name.clone(),
                    SourceState {
                        last_checked: summary.finished_at,
                        ok: s.error.is_none(),
                        items: s.items,
                        error: s.error.clone(),
                    },
                );
            }
            for (name, err) in summary.source_errors() {
                d.push_error(summary.finished_at, &format!("source {name}"), err);
            }
            for err in &summary.delivery_errors {
                d.push_error(summary.finished_at, "delivery", err);
            }
            if let Some(err) = &summary.error {
                d.push_error(summary.finished_at, &format!("run {}", summary.run_id), err);
            }
            d.last_summary = Some(summary.clone());
        });
    }

    pub fn record_skipped(&self) {
        self.update(|d| d.skipped_triggers += 1);
    }

    pub fn record_error(&self, context: &str, message: &str) {
        self.update(|d| d.push_error(Utc::now(), context, message));
    }

    pub fn record_compaction(&self, at: DateTime<Utc>, report: &CompactionReport) {
        self.update(|d| {
            d.last_compaction = Some(at);
            d.history_size = report.remaining;
        });
    }

    fn update(&self, f: impl FnOnce(&mut StatusData)) {
        let snapshot = match self.data.lock() {
            Ok(mut d) => {
                f(&mut *d);
                d.clone()
            }
            Err(_) => {
                tracing::error!("status lock poisoned; update dropped");
                return;
            }
        };
        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &snapshot) {
                tracing::warn!(error = ?e, "status not persisted");
            }
        }
    }

    /// MarkdownV2 status report.
    pub fn report_text(&self, now: DateTime<Utc>) -> String {
        let d = self.snapshot();
        let health = d.health(now, self.run_interval);
        let esc = escape_markdown_v2;

        let mut out = String::from("*📊 Feed Courier Status*\n\n");
        out.push_str(&format!("*Health:* {}\n", esc(&health.to_string())));
        let last = d
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!("*Last run:* {}\n", esc(&last)));
        out.push_str(&format!(
            "*Runs:* {} total, {} ok, {} partial, {} failed, {} skipped\n",
            d.total_runs, d.successful_runs, d.partial_runs, d.failed_runs, d.skipped_triggers
        ));
        out.push_str(&format!("*Posts sent:* {}\n", d.posts_sent));
        out.push_str(&format!("*History size:* {}\n", d.history_size));

        if !d.sources.is_empty() {
            out.push_str("\n*Sources:*\n");
            for (name, s) in &d.sources {
                let mark = if s.ok { "✅" } else { "❌" };
                out.push_str(&format!("{mark} {} \\({} items\\)\n", esc(name), s.items));
            }
        }

        if !d.errors.is_empty() {
            out.push_str("\n*Recent errors:*\n");
            for e in d.errors.iter().rev().take(REPORT_ERRORS) {
                let line = format!("{} {}: {}", e.at.format("%m-%d %H:%M"), e.context, e.message);
                out.push_str(&format!("• {}\n", esc(&line)));
            }
        }
        out.trim_end().to_string()
    }
}

fn persist(path: &Path, data: &StatusData) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SourceStat;
    use chrono::TimeZone;

    fn summary(status: RunStatus, at: DateTime<Utc>) -> RunSummary {
        let mut s = RunSummary::failed(1, at, "x");
        s.status = status;
        s.error = None;
        s.finished_at = at;
        s.delivered = 2;
        s.sources = vec![SourceStat {
            name: "A".into(),
            pages: 1,
            items: 2,
            retries: 0,
            error: None,
        }];
        s
    }

    #[test]
    fn health_rules() {
        let iv = Duration::from_secs(30 * 60);
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let mut d = StatusData::default();
        assert_eq!(d.health(now, iv), Health::Unknown);

        d.last_run = Some(now - chrono::Duration::minutes(61));
        d.total_runs = 1;
        assert_eq!(d.health(now, iv), Health::Unhealthy("last run too long ago".into()));

        d.last_run = Some(now - chrono::Duration::minutes(10));
        d.total_runs = 10;
        d.failed_runs = 4;
        assert_eq!(d.health(now, iv), Health::Unhealthy("high error rate".into()));

        d.failed_runs = 3;
        assert_eq!(d.health(now, iv), Health::Healthy);
    }

    #[test]
    fn errors_are_bounded() {
        let m = StatusMonitor::in_memory(Duration::from_secs(60));
        for i in 0..(MAX_RECENT_ERRORS + 7) {
            m.record_error("test", &format!("e{i}"));
        }
        let d = m.snapshot();
        assert_eq!(d.errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(d.errors.back().unwrap().message, format!("e{}", MAX_RECENT_ERRORS + 6));
    }

    #[test]
    fn persisted_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();

        let m = StatusMonitor::load(&path, Duration::from_secs(60));
        m.record_run(&summary(RunStatus::Success, at));
        m.record_run(&summary(RunStatus::Partial, at));
        m.record_skipped();

        let again = StatusMonitor::load(&path, Duration::from_secs(60));
        let d = again.snapshot();
        assert_eq!(d.total_runs, 2);
        assert_eq!(d.successful_runs, 1);
        assert_eq!(d.partial_runs, 1);
        assert_eq!(d.skipped_triggers, 1);
        assert_eq!(d.posts_sent, 4);
        assert!(d.sources["A"].ok);
        assert!(!dir.path().join("status.json.tmp").exists());
    }

    #[test]
    fn report_mentions_totals_and_errors() {
        let m = StatusMonitor::in_memory(Duration::from_secs(60));
        m.record_error("source B", "timeout");
        let text = m.report_text(Utc::now());
        assert!(text.contains("*Health:* Unknown"));
        assert!(text.contains("*Runs:* 0 total"));
        assert!(text.contains("source B: timeout"));
    }
}
