// src/scheduler.rs
//! Drives the pipeline on a fixed interval and the maintenance cycle on a
//! slower one. Runs never overlap: a trigger that finds a run in progress is
//! dropped.

use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::history::{CompactionReport, RetentionPolicy};
use crate::logging::prune_log_dir;
use crate::pipeline::{Pipeline, RunSummary};
use crate::status::StatusMonitor;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    /// Transient: the last run aborted; cleared when its guard drops.
    Failed,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            RUNNING => SchedulerState::Running,
            FAILED => SchedulerState::Failed,
            _ => SchedulerState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Another run held the token; nothing was started.
    Skipped,
    Completed(RunSummary),
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub compaction: Option<CompactionReport>,
    pub logs_removed: usize,
    pub report_sent: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub run_interval: Duration,
    pub maintenance_interval: Duration,
    pub retention: RetentionPolicy,
    pub log_dir: Option<PathBuf>,
    pub log_retention: Duration,
    pub send_status_reports: bool,
}

impl SchedulerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let s = &cfg.settings;
        Self {
            run_interval: s.run_interval(),
            maintenance_interval: s.status_report_interval(),
            retention: RetentionPolicy {
                max_age: s.url_retention(),
                max_records: s.max_stored_urls,
            },
            log_dir: s.log_dir.clone(),
            log_retention: Duration::from_secs(s.log_retention_days * 86_400),
            send_status_reports: cfg.delivery.send_status_reports,
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "courier_skipped_triggers_total",
            "Timer firings dropped because a run was in progress."
        );
        describe_counter!("courier_maintenance_runs_total", "Maintenance cycles executed.");
    });
}

/// Clears the run token on drop, also when the run future is cancelled.
struct RunToken {
    state: Arc<AtomicU8>,
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.state.store(IDLE, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    status: Arc<StatusMonitor>,
    cfg: SchedulerConfig,
    state: Arc<AtomicU8>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, status: Arc<StatusMonitor>, cfg: SchedulerConfig) -> Self {
        ensure_metrics_described();
        Self {
            pipeline,
            status,
            cfg,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> &Arc<StatusMonitor> {
        &self.status
    }

    fn try_acquire(&self) -> Option<RunToken> {
        // FAILED only lives while the previous token is still held
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunToken {
                state: self.state.clone(),
            })
    }

    /// Start a run unless one is in progress, and wait for it.
    ///
    /// The run executes in its own task so a panic inside it is contained and
    /// counted as a failed run.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(_token) = self.try_acquire() else {
            tracing::warn!("pipeline run still in progress, skipping trigger");
            counter!("courier_skipped_triggers_total").increment(1);
            self.status.record_skipped();
            return TriggerOutcome::Skipped;
        };

        let run_id = self.pipeline.next_run_id();
        let started_at = Utc::now();
        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move { pipeline.run_once(run_id).await });

        let summary = match handle.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                self.state.store(FAILED, Ordering::SeqCst);
                tracing::error!(run_id, error = %e, "pipeline run aborted");
                self.failed(run_id, started_at, e.to_string())
            }
            Err(join) => {
                self.state.store(FAILED, Ordering::SeqCst);
                let why = if join.is_panic() {
                    "pipeline run panicked".to_string()
                } else {
                    format!("pipeline run cancelled: {join}")
                };
                tracing::error!(run_id, error = %why, "pipeline run aborted");
                self.failed(run_id, started_at, why)
            }
        };

        self.status.record_run(&summary);
        TriggerOutcome::Completed(summary)
    }

    fn failed(&self, run_id: u64, started_at: chrono::DateTime<Utc>, why: String) -> RunSummary {
        counter!("courier_runs_total", "status" => "failed").increment(1);
        RunSummary::failed(run_id, started_at, why)
    }

    /// Compaction, log pruning and status report. Compaction waits for the
    /// history writer, so it never interleaves with a run's append path.
    pub async fn maintain(&self) -> MaintenanceReport {
        counter!("courier_maintenance_runs_total").increment(1);
        let mut report = MaintenanceReport::default();
        let now = Utc::now();

        match self.pipeline.history().compact(self.cfg.retention, now).await {
            Ok(c) => {
                self.status.record_compaction(now, &c);
                report.compaction = Some(c);
            }
            Err(e) => {
                tracing::error!(error = %e, "history compaction failed");
                self.status.record_error("compaction", &e.to_string());
            }
        }

        if let Some(dir) = &self.cfg.log_dir {
            match prune_log_dir(dir, self.cfg.log_retention, SystemTime::now()) {
                Ok(n) => report.logs_removed = n,
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "log cleanup failed"),
            }
        }

        let text = self.status.report_text(Utc::now());
        tracing::info!(health = %self.status.health(Utc::now()), "status report\n{text}");
        if self.cfg.send_status_reports {
            let res = self.pipeline.send_text(&text).await;
            report.report_sent = res.is_ok();
            if !res.is_ok() {
                tracing::warn!(result = ?res, "status report not delivered");
            }
        }
        report
    }

    /// Tick forever until `shutdown` resolves. The first pipeline run starts
    /// immediately; the first maintenance cycle after one maintenance interval.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut runs = tokio::time::interval(self.cfg.run_interval);
        runs.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let first_maintenance = tokio::time::Instant::now() + self.cfg.maintenance_interval;
        let mut maintenance = tokio::time::interval_at(first_maintenance, self.cfg.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            run_interval = ?self.cfg.run_interval,
            maintenance_interval = ?self.cfg.maintenance_interval,
            "scheduler started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = runs.tick() => {
                    // spawned so the ticker keeps firing (and skipping) during long runs
                    let me = self.clone();
                    tokio::spawn(async move { me.trigger().await; });
                }
                _ = maintenance.tick() => {
                    let me = self.clone();
                    tokio::spawn(async move { me.maintain().await; });
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}
