//! Periodic keybox validity checks.
//!
//! A cycle takes the shared lock twice: once to snapshot the enabled entries,
//! once to disable the revoked ones. Oracle calls and notification delivery
//! happen in between, without the lock, each with its own timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use super::{KeyboxEntry, Notification, NotificationSink, OracleError, Validity, ValidityOracle};
use crate::Result;
use crate::state::SharedState;
use crate::store::Setting;

/// When scheduled cycles run.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryResult {
    pub id: String,
    pub status: Validity,
}

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub results: Vec<EntryResult>,
    /// Entries this cycle moved to `keyboxes/revoked/`.
    pub disabled: Vec<String>,
    pub notified: bool,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn unknown(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == Validity::Unknown)
            .count()
    }
}

pub struct KeyboxMaintainer {
    state: SharedState,
    oracle: Arc<dyn ValidityOracle>,
    sink: Arc<dyn NotificationSink>,
    port: u16,
    oracle_timeout: Duration,
    wake: Arc<Notify>,
}

impl KeyboxMaintainer {
    pub fn new(
        state: SharedState,
        oracle: Arc<dyn ValidityOracle>,
        sink: Arc<dyn NotificationSink>,
        port: u16,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            state,
            oracle,
            sink,
            port,
            oracle_timeout,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Ask the background loop to run a cycle now.
    pub fn request_scan(&self) {
        self.wake.notify_one();
    }

    /// Handle other tasks can use to request a scan.
    pub fn scan_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    async fn call_oracle<T, F>(&self, what: &str, f: F) -> std::result::Result<T, OracleError>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, OracleError> + Send + 'static,
    {
        match tokio::time::timeout(self.oracle_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(OracleError::Unavailable(format!("{} panicked: {}", what, join))),
            Err(_) => Err(OracleError::Timeout),
        }
    }

    async fn check_entry(&self, entry: KeyboxEntry) -> Validity {
        let oracle = Arc::clone(&self.oracle);
        let id = entry.id.clone();
        match self.call_oracle("check", move || oracle.check(&entry)).await {
            Ok(validity) => validity,
            Err(e) => {
                tracing::warn!(keybox = %id, error = %e, "validity unknown");
                Validity::Unknown
            }
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let entries = {
            let state = self.state.lock().await?;
            state.keyboxes.enabled_entries()?
        };
        tracing::info!(entries = entries.len(), "keybox maintenance cycle started");

        if !entries.is_empty() {
            let oracle = Arc::clone(&self.oracle);
            if let Err(e) = self.call_oracle("refresh", move || oracle.refresh()).await {
                tracing::warn!(error = %e, "oracle refresh failed");
            }
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id.clone();
            let status = self.check_entry(entry).await;
            results.push(EntryResult { id, status });
        }

        let mut disabled = Vec::new();
        {
            let mut state = self.state.lock().await?;
            for result in &results {
                state.keyboxes.record_status(&result.id, result.status);
                if result.status != Validity::Revoked {
                    continue;
                }
                match state.keyboxes.set_enabled(&result.id, false) {
                    Ok(true) => disabled.push(result.id.clone()),
                    Ok(false) => {
                        tracing::debug!(keybox = %result.id, "already disabled")
                    }
                    Err(e) => {
                        tracing::error!(keybox = %result.id, error = %e, "failed to disable keybox")
                    }
                }
            }
        }

        let notified = !disabled.is_empty() && self.notify(disabled.len()).await;

        let report = CycleReport {
            checked: results.len(),
            results,
            disabled,
            notified,
            finished_at: Utc::now(),
        };
        tracing::info!(
            checked = report.checked,
            disabled = report.disabled.len(),
            unknown = report.unknown(),
            "keybox maintenance cycle finished"
        );
        Ok(report)
    }

    async fn notify(&self, count: usize) -> bool {
        let sink = Arc::clone(&self.sink);
        let notification = Notification::keyboxes_disabled(count, self.port);
        match tokio::task::spawn_blocking(move || sink.deliver(&notification)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "notification not delivered");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "notification task failed");
                false
            }
        }
    }

    async fn auto_check_enabled(&self) -> bool {
        let checked = self
            .state
            .lock()
            .await
            .and_then(|state| state.store.is_enabled(Setting::AutoKeyboxCheck));
        match checked {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::error!(error = %e, "could not read auto_keybox_check");
                false
            }
        }
    }

    /// Background loop: scheduled cycles (gated by `auto_keybox_check`) plus
    /// on-demand cycles from [`request_scan`](Self::request_scan).
    pub async fn run(self: Arc<Self>, schedule: MaintenanceSchedule) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + schedule.initial_delay, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.auto_check_enabled().await {
                        tracing::debug!("scheduled keybox check skipped, auto check disabled");
                        continue;
                    }
                }
                _ = self.wake.notified() => {
                    tracing::info!("keybox scan requested");
                }
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "keybox maintenance cycle failed");
            }
        }
    }
}
