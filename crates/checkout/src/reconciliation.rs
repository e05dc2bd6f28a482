//! Reconciliation of payments that may have been taken without an order.
//!
//! Two kinds of attempt are recorded here: the charge was approved but the
//! commit failed, or the charge timed out and its outcome is unknown.
//! A retry under the same idempotency key settles the entry before it
//! commits. Otherwise the [`ReversalWorker`] claims the entry once the
//! grace period has passed and refunds whatever was captured.
//!
//! Entry lifecycle:
//!
//! ```text
//! Pending --settle--> Settled
//! Pending --claim---> Reversing --refund ok-----> Reversed
//!                               --nothing held--> Voided --settle--> Settled
//!                               --refund fault--> Pending
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::AttemptId;
use domain::{CustomerId, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::payment::{PaymentGateway, RefundOutcome, RefundRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationStatus {
    /// Waiting for a retry or for reversal.
    Pending,
    /// Claimed by the reversal worker; a refund is in flight.
    Reversing,
    /// A later attempt with the same key committed the order.
    Settled,
    /// The charge was refunded.
    Reversed,
    /// The provider held no captured charge under the key.
    Voided,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Reversing => "reversing",
            ReconciliationStatus::Settled => "settled",
            ReconciliationStatus::Reversed => "reversed",
            ReconciliationStatus::Voided => "voided",
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A settle refused because the payment is being, or has been, refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("payment for attempt {attempt_id} is {status}")]
pub struct SettleConflict {
    pub attempt_id: AttemptId,
    pub status: ReconciliationStatus,
}

/// A payment that may have been taken with no committed order behind it.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationEntry {
    pub attempt_id: AttemptId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub provider_ref: Option<String>,
    /// False when the charge timed out and the provider never answered.
    pub payment_confirmed: bool,
    /// Why the attempt did not finish.
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub status: ReconciliationStatus,
    pub reversal_attempts: u32,
    pub last_error: Option<String>,
}

impl ReconciliationEntry {
    /// An approved charge whose order could not be committed.
    pub fn new(
        attempt_id: AttemptId,
        customer_id: CustomerId,
        amount: Money,
        currency: impl Into<String>,
        provider_ref: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            attempt_id,
            customer_id,
            amount,
            currency: currency.into(),
            provider_ref,
            payment_confirmed: true,
            reason: reason.into(),
            recorded_at: Utc::now(),
            status: ReconciliationStatus::Pending,
            reversal_attempts: 0,
            last_error: None,
        }
    }

    /// A charge whose outcome is unknown.
    pub fn unconfirmed(
        attempt_id: AttemptId,
        customer_id: CustomerId,
        amount: Money,
        currency: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            payment_confirmed: false,
            ..Self::new(attempt_id, customer_id, amount, currency, None, reason)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReconciliationStatus::Pending
    }
}

/// Durable record of attempts awaiting reconciliation.
///
/// Every status change is a compare-and-set on the current status, so a
/// settling retry and the reversal worker can never both win.
#[async_trait]
pub trait ReconciliationLog: Send + Sync {
    /// Records an attempt.
    ///
    /// A new entry replaces a settled one. A pending entry keeps its
    /// original `recorded_at` and is only upgraded from unconfirmed to
    /// confirmed. Entries being or already reversed, or voided, are left
    /// untouched.
    async fn record(&self, entry: ReconciliationEntry);

    /// Marks an entry as settled ahead of committing its order.
    ///
    /// Returns true if a pending or voided entry was settled, false if
    /// there is nothing to settle, and an error if the worker has claimed
    /// or reversed the payment.
    async fn settle(&self, attempt_id: AttemptId) -> Result<bool, SettleConflict>;

    /// Pending entries recorded at or before `cutoff`, oldest first.
    async fn pending_before(&self, cutoff: DateTime<Utc>) -> Vec<ReconciliationEntry>;

    /// Moves a pending entry to reversing. Returns false if it is no
    /// longer pending.
    async fn claim(&self, attempt_id: AttemptId) -> bool;

    /// Marks a claimed entry as reversed.
    async fn mark_reversed(&self, attempt_id: AttemptId) -> bool;

    /// Marks a claimed entry as voided.
    async fn mark_voided(&self, attempt_id: AttemptId) -> bool;

    /// Returns a claimed entry to pending and notes the failed reversal.
    async fn record_failure(&self, attempt_id: AttemptId, error: String);

    async fn get(&self, attempt_id: AttemptId) -> Option<ReconciliationEntry>;
}

/// In-memory reconciliation log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReconciliationLog {
    entries: Arc<RwLock<HashMap<AttemptId, ReconciliationEntry>>>,
}

impl InMemoryReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries still pending.
    pub async fn pending_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_pending())
            .count()
    }

    async fn transition(
        &self,
        attempt_id: AttemptId,
        from: ReconciliationStatus,
        to: ReconciliationStatus,
    ) -> bool {
        match self.entries.write().await.get_mut(&attempt_id) {
            Some(entry) if entry.status == from => {
                entry.status = to;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ReconciliationLog for InMemoryReconciliationLog {
    async fn record(&self, entry: ReconciliationEntry) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.attempt_id) {
            None => {
                entries.insert(entry.attempt_id, entry);
            }
            Some(existing) if existing.status == ReconciliationStatus::Settled => {
                *existing = entry;
            }
            Some(existing) if existing.is_pending() => {
                if entry.payment_confirmed && !existing.payment_confirmed {
                    existing.payment_confirmed = true;
                    existing.provider_ref = entry.provider_ref;
                }
                existing.reason = entry.reason;
            }
            Some(_) => {}
        }
    }

    async fn settle(&self, attempt_id: AttemptId) -> Result<bool, SettleConflict> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&attempt_id) else {
            return Ok(false);
        };
        match entry.status {
            ReconciliationStatus::Pending | ReconciliationStatus::Voided => {
                entry.status = ReconciliationStatus::Settled;
                Ok(true)
            }
            ReconciliationStatus::Settled => Ok(false),
            status @ (ReconciliationStatus::Reversing | ReconciliationStatus::Reversed) => {
                Err(SettleConflict { attempt_id, status })
            }
        }
    }

    async fn pending_before(&self, cutoff: DateTime<Utc>) -> Vec<ReconciliationEntry> {
        let entries = self.entries.read().await;
        let mut pending: Vec<ReconciliationEntry> = entries
            .values()
            .filter(|e| e.is_pending() && e.recorded_at <= cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.recorded_at);
        pending
    }

    async fn claim(&self, attempt_id: AttemptId) -> bool {
        self.transition(
            attempt_id,
            ReconciliationStatus::Pending,
            ReconciliationStatus::Reversing,
        )
        .await
    }

    async fn mark_reversed(&self, attempt_id: AttemptId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&attempt_id) {
            Some(entry) if entry.status == ReconciliationStatus::Reversing => {
                entry.status = ReconciliationStatus::Reversed;
                entry.last_error = None;
                true
            }
            _ => false,
        }
    }

    async fn mark_voided(&self, attempt_id: AttemptId) -> bool {
        self.transition(
            attempt_id,
            ReconciliationStatus::Reversing,
            ReconciliationStatus::Voided,
        )
        .await
    }

    async fn record_failure(&self, attempt_id: AttemptId, error: String) {
        if let Some(entry) = self.entries.write().await.get_mut(&attempt_id) {
            if entry.status == ReconciliationStatus::Reversing {
                entry.status = ReconciliationStatus::Pending;
                entry.reversal_attempts += 1;
                entry.last_error = Some(error);
            }
        }
    }

    async fn get(&self, attempt_id: AttemptId) -> Option<ReconciliationEntry> {
        self.entries.read().await.get(&attempt_id).cloned()
    }
}

/// Outcome of one reversal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReversalReport {
    pub reversed: usize,
    pub voided: usize,
    pub failed: usize,
}

/// Refunds pending reconciliation entries older than the grace period.
pub struct ReversalWorker<P, L>
where
    P: PaymentGateway,
    L: ReconciliationLog,
{
    payment: P,
    log: L,
    grace: Duration,
}

impl<P, L> ReversalWorker<P, L>
where
    P: PaymentGateway,
    L: ReconciliationLog,
{
    pub fn new(payment: P, log: L, grace: Duration) -> Self {
        Self {
            payment,
            log,
            grace,
        }
    }

    /// Runs one sweep over the pending entries.
    ///
    /// Each entry is claimed before its refund is requested; entries a
    /// retry settled in the meantime are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> ReversalReport {
        let cutoff = TimeDelta::from_std(self.grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = ReversalReport::default();
        for entry in self.log.pending_before(cutoff).await {
            if !self.log.claim(entry.attempt_id).await {
                tracing::debug!(attempt_id = %entry.attempt_id, "entry no longer pending");
                continue;
            }

            let refund = RefundRequest {
                charge_key: entry.attempt_id,
                provider_ref: entry.provider_ref.clone(),
                amount: entry.amount,
                currency: entry.currency.clone(),
            };

            match self.payment.refund(&refund).await {
                Ok(RefundOutcome::Refunded) => {
                    self.log.mark_reversed(entry.attempt_id).await;
                    report.reversed += 1;
                    metrics::counter!("reconciliation_reversed_total").increment(1);
                    tracing::info!(
                        attempt_id = %entry.attempt_id,
                        provider_ref = ?entry.provider_ref,
                        amount = %entry.amount,
                        "captured payment reversed"
                    );
                }
                Ok(RefundOutcome::NoCharge) => {
                    self.log.mark_voided(entry.attempt_id).await;
                    report.voided += 1;
                    metrics::counter!("reconciliation_voided_total").increment(1);
                    if entry.payment_confirmed {
                        tracing::warn!(
                            attempt_id = %entry.attempt_id,
                            provider_ref = ?entry.provider_ref,
                            "provider holds no charge for an approved payment"
                        );
                    } else {
                        tracing::info!(
                            attempt_id = %entry.attempt_id,
                            "timed out charge was never captured"
                        );
                    }
                }
                Err(fault) => {
                    self.log
                        .record_failure(entry.attempt_id, fault.to_string())
                        .await;
                    report.failed += 1;
                    tracing::warn!(
                        attempt_id = %entry.attempt_id,
                        attempts = entry.reversal_attempts + 1,
                        error = %fault,
                        "payment reversal failed, will retry"
                    );
                }
            }
        }
        report
    }

    /// Sweeps forever on a fixed interval.
    pub async fn run(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            if report != ReversalReport::default() {
                tracing::debug!(?report, "reversal sweep finished");
            }
        }
    }
}
