//! Background jobs: subscription billing, auto-top-up scans, and purchase
//! reconciliation.

use std::time::Duration;

use chrono::Utc;

use crate::state::AppState;

/// Purchases examined per reconciliation pass.
const RECONCILE_BATCH: usize = 100;

/// Spawn the periodic background jobs.
///
/// Each job runs on its own interval; an interval of zero disables the job.
pub fn spawn(state: &AppState) {
    spawn_billing(state.clone());
    spawn_topup(state.clone());
    spawn_reconcile(state.clone());
}

fn spawn_billing(state: AppState) {
    let seconds = state.config.billing_interval_seconds;
    if seconds == 0 {
        tracing::warn!("Subscription billing job disabled");
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
        loop {
            ticker.tick().await;
            match state.scheduler.run_once(Utc::now()).await {
                Ok(report) if report.examined > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        billed = report.billed,
                        failed = report.failed,
                        cancelled = report.cancelled,
                        skipped = report.skipped,
                        "Billing run finished"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "Billing run failed"),
            }
        }
    });
}

fn spawn_topup(state: AppState) {
    let seconds = state.config.topup_interval_seconds;
    if seconds == 0 {
        tracing::warn!("Auto-top-up job disabled");
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
        loop {
            ticker.tick().await;
            match state.topup.run_once(Utc::now()).await {
                Ok(report) if report.examined > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        topped_up = report.topped_up,
                        failed = report.failed,
                        "Auto-top-up scan finished"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "Auto-top-up scan failed"),
            }
        }
    });
}

fn spawn_reconcile(state: AppState) {
    let seconds = state.config.reconcile_interval_seconds;
    if seconds == 0 {
        tracing::warn!("Reconciliation job disabled");
        return;
    }
    let stale_after = chrono::Duration::minutes(state.config.reconcile_stale_minutes);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
        loop {
            ticker.tick().await;
            match state
                .orchestrator
                .reconcile(Utc::now(), stale_after, RECONCILE_BATCH)
                .await
            {
                Ok(report) if report.examined > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        completed = report.completed,
                        failed = report.failed,
                        skipped = report.skipped,
                        "Reconciliation pass finished"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "Reconciliation pass failed"),
            }
        }
    });
}
