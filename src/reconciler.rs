//! Settlement reconciliation.
//!
//! Consumes transfer-network status events (at-least-once, possibly out of
//! order or duplicated) and drives the linked ledger entry to a terminal
//! state. Every outcome is acknowledgeable: the webhook endpoint returns
//! success for applied work, duplicates, and anomalies alike, so the
//! network stops retrying.

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::ledger::{LedgerError, LedgerStore};
use crate::model::{
    ProcessedBy, SettlementEvent, SettlementStatus, Transaction, TxKind, TxStatus,
};
use crate::transfer::Notifier;

/// What handling one event did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The entry moved forward (or a compensating refund was recorded).
    Applied,
    /// Duplicate delivery of an effect already applied.
    AlreadyApplied,
    /// No matching entry, or a terminal conflict; logged and dropped.
    Ignored,
}

/// Drives ledger entries to terminal states from network events.
pub struct SettlementReconciler<T> {
    store: Arc<LedgerStore>,
    notifier: T,
}

impl<T: Notifier> SettlementReconciler<T> {
    pub fn new(store: Arc<LedgerStore>, notifier: T) -> Self {
        Self { store, notifier }
    }

    /// Consume an event stream, applying each event. Never stops on a bad
    /// event; reconciliation must outlive individual anomalies.
    pub async fn run(&self, mut stream: impl Stream<Item = SettlementEvent> + Unpin) {
        while let Some(event) = stream.next().await {
            let outcome = self.handle_event(&event).await;
            info!(transfer = event.transfer_id, ?outcome, "settlement event handled");
        }
    }

    /// Apply one settlement event.
    pub async fn handle_event(&self, event: &SettlementEvent) -> ReconcileOutcome {
        let Some(tx) = self.match_transaction(&event.transfer_id) else {
            warn!(transfer = event.transfer_id, "event for unknown transfer");
            return ReconcileOutcome::Ignored;
        };

        match event.new_status {
            SettlementStatus::Pending => self.mark_processing(&tx),
            SettlementStatus::Settled => self.settle(&tx).await,
            SettlementStatus::Failed | SettlementStatus::Cancelled => {
                let target = match event.new_status {
                    SettlementStatus::Cancelled => TxStatus::Cancelled,
                    _ => TxStatus::Failed,
                };
                self.fail(&tx, target, event.failure_reason.clone()).await
            }
        }
    }
}

impl<T: Notifier> SettlementReconciler<T> {
    /// Match by the network's transfer id first, caller reference as a
    /// fallback.
    fn match_transaction(&self, transfer_id: &str) -> Option<Transaction> {
        self.store
            .find_by_external_id(transfer_id)
            .or_else(|| self.store.find_by_reference(transfer_id))
    }

    fn mark_processing(&self, tx: &Transaction) -> ReconcileOutcome {
        match tx.status {
            TxStatus::Pending => {
                match self
                    .store
                    .transition(tx.id, TxStatus::Processing, None, None)
                {
                    Ok(_) => ReconcileOutcome::Applied,
                    Err(err) => {
                        error!(tx = tx.id, error = %err, "processing transition failed");
                        ReconcileOutcome::Ignored
                    }
                }
            }
            // Already in flight or past it; nothing to do.
            _ => ReconcileOutcome::AlreadyApplied,
        }
    }

    async fn settle(&self, tx: &Transaction) -> ReconcileOutcome {
        if tx.status == TxStatus::Completed {
            return ReconcileOutcome::AlreadyApplied;
        }
        if tx.status.is_terminal() {
            warn!(
                tx = tx.id,
                status = ?tx.status,
                "settled event for transaction already terminal, ignoring"
            );
            return ReconcileOutcome::Ignored;
        }

        match self.store.transition(
            tx.id,
            TxStatus::Completed,
            None,
            Some(ProcessedBy::AutomatedSystem),
        ) {
            Ok(done) => {
                self.notify_outcome(&done, true).await;
                ReconcileOutcome::Applied
            }
            Err(LedgerError::InsufficientFunds { available, .. }) => {
                // Invariant-protection fallback: the funds promised to this
                // withdrawal are gone. Fail it for manual reconciliation
                // rather than allow a negative balance.
                warn!(
                    tx = tx.id,
                    available = %available,
                    requested = %tx.amount,
                    "withdrawal settled without available funds, routing to manual reconciliation"
                );
                match self.store.transition(
                    tx.id,
                    TxStatus::Failed,
                    Some("settlement exceeded available funds".to_string()),
                    Some(ProcessedBy::AutomatedSystem),
                ) {
                    Ok(done) => {
                        self.notify_outcome(&done, false).await;
                        ReconcileOutcome::Applied
                    }
                    Err(err) => {
                        error!(tx = tx.id, error = %err, "failed to fail guarded settlement");
                        ReconcileOutcome::Ignored
                    }
                }
            }
            Err(err) => {
                error!(tx = tx.id, error = %err, "settlement transition failed");
                ReconcileOutcome::Ignored
            }
        }
    }

    async fn fail(
        &self,
        tx: &Transaction,
        target: TxStatus,
        reason: Option<String>,
    ) -> ReconcileOutcome {
        if tx.status == target {
            return ReconcileOutcome::AlreadyApplied;
        }
        if tx.status == TxStatus::Completed && tx.kind == TxKind::Withdrawal {
            return self.reverse_completed_withdrawal(tx, reason).await;
        }
        if tx.status.is_terminal() {
            warn!(
                tx = tx.id,
                status = ?tx.status,
                target = ?target,
                "failure event conflicts with terminal status, ignoring"
            );
            return ReconcileOutcome::Ignored;
        }

        match self.store.transition(
            tx.id,
            target,
            reason,
            Some(ProcessedBy::AutomatedSystem),
        ) {
            Ok(done) => {
                self.notify_outcome(&done, false).await;
                ReconcileOutcome::Applied
            }
            Err(err) => {
                error!(tx = tx.id, error = %err, "failure transition failed");
                ReconcileOutcome::Ignored
            }
        }
    }

    /// True reversal: the network reported a withdrawal failed after it
    /// already settled and was debited. Credit the amount back as a Refund;
    /// the derived reference keeps re-delivered reversals idempotent.
    async fn reverse_completed_withdrawal(
        &self,
        tx: &Transaction,
        reason: Option<String>,
    ) -> ReconcileOutcome {
        warn!(
            tx = tx.id,
            reference = tx.reference,
            "failure reported for settled withdrawal, issuing compensating refund"
        );
        let reference = format!("{}/reversal", tx.reference);
        let description = match reason {
            Some(reason) => format!("reversal of {}: {reason}", tx.reference),
            None => format!("reversal of {}", tx.reference),
        };
        match self.store.record_completed_credit(
            tx.wallet_id,
            tx.amount,
            TxKind::Refund,
            &reference,
            &description,
            Some(ProcessedBy::AutomatedSystem),
        ) {
            Ok((refund, _)) => {
                self.notify_outcome(&refund, true).await;
                ReconcileOutcome::Applied
            }
            Err(err) => {
                error!(tx = tx.id, error = %err, "compensating refund failed");
                ReconcileOutcome::Ignored
            }
        }
    }

    /// Fire-and-forget; failures are the notifier's problem, the ledger is
    /// already committed.
    async fn notify_outcome(&self, tx: &Transaction, success: bool) {
        let Ok(wallet) = self.store.wallet(tx.wallet_id) else {
            return;
        };
        let (title, message) = if success {
            (
                "Transfer completed",
                format!("Your {:?} of {} has completed.", tx.kind, tx.amount),
            )
        } else {
            (
                "Transfer failed",
                format!(
                    "Your {:?} of {} could not be completed{}.",
                    tx.kind,
                    tx.amount,
                    tx.error_message
                        .as_deref()
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                ),
            )
        };
        self.notifier.notify(wallet.user_id, title, &message).await;
    }
}
