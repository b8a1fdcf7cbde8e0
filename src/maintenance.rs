use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::payments::PaymentService;
use crate::premium::PremiumService;

/// Bundles reconciled in parallel per tick.
const RECONCILE_CONCURRENCY: usize = 8;

#[derive(Debug, Default, Clone, Serialize)]
pub struct TickReport {
    pub expired: Vec<Uuid>,
    pub outdated: Vec<Uuid>,
    pub failures: usize,
}

/// key: maintenance-scheduler -> expiry reconciliation and stale transaction sweep
pub fn spawn(premium: PremiumService, payments: PaymentService) {
    let interval = TokioDuration::from_secs(*config::MAINTENANCE_SCAN_INTERVAL_SECS);
    let stale_after = Duration::hours(*config::TRANSACTION_STALE_AFTER_HOURS);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(err) = process_tick(&premium, &payments, now, stale_after).await {
                warn!(?err, "entitlement maintenance tick failed");
            }
        }
    });
}

/// key: maintenance-scheduler -> tick handler
pub async fn process_tick(
    premium: &PremiumService,
    payments: &PaymentService,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<TickReport> {
    let mut report = TickReport::default();

    let candidates = premium.expired_bundles(now).await?;
    let results: Vec<_> = stream::iter(candidates)
        .map(|profile_id| async move { (profile_id, premium.reconcile_expiry(profile_id, now).await) })
        .buffer_unordered(RECONCILE_CONCURRENCY)
        .collect()
        .await;
    for (profile_id, result) in results {
        match result {
            Ok(true) => report.expired.push(profile_id),
            Ok(false) => debug!(%profile_id, "bundle already reconciled"),
            Err(err) => {
                report.failures += 1;
                warn!(?err, %profile_id, "failed to reconcile lapsed premium");
            }
        }
    }

    report.outdated = payments.mark_outdated(stale_after, now).await?;

    if !report.expired.is_empty() || !report.outdated.is_empty() {
        info!(
            expired = report.expired.len(),
            outdated = report.outdated.len(),
            failures = report.failures,
            "entitlement maintenance tick completed"
        );
    }
    Ok(report)
}
