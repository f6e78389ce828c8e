//! The wallet service facade exposed to the rest of the application.
//!
//! Thin composition of the ledger store, fund mover, settlement
//! reconciler, and bid eligibility evaluator. Authentication stays with
//! the caller: user endpoints take an authenticated `UserId`, admin
//! endpoints take the operator's identity.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::Amount;
use crate::eligibility::{BidCheck, BidEligibility};
use crate::ledger::{LedgerError, LedgerStore, Wallet};
use crate::model::{
    AuctionId, ProcessedBy, SettlementEvent, SettlementStatus, Transaction, TransferTicket,
    TxId, TxKind, TxStatus, UserId,
};
use crate::orchestrator::{FundMoveError, FundMover};
use crate::reconciler::{ReconcileOutcome, SettlementReconciler};
use crate::transfer::{LinkedAccounts, Notifier, TransferNetwork};

/// How many ledger entries a wallet view includes.
const RECENT_LIMIT: usize = 20;

/// Wallet state as shown to the user.
#[derive(Debug, Clone)]
pub struct WalletView {
    pub balance: Amount,
    pub available: Amount,
    pub frozen: Amount,
    pub recent: Vec<Transaction>,
}

#[derive(Debug, Error)]
pub enum AdminActionError {
    #[error("transaction {0} is not a withdrawal")]
    NotAWithdrawal(TxId),

    #[error("transaction {tx} is already {status:?}")]
    AlreadyDecided { tx: TxId, status: TxStatus },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One wiring of the escrow engine, shared-state components behind `Arc`.
pub struct WalletService<N, L, T> {
    store: Arc<LedgerStore>,
    mover: FundMover<N, L>,
    reconciler: SettlementReconciler<T>,
    eligibility: BidEligibility,
}

impl<N: TransferNetwork, L: LinkedAccounts, T: Notifier> WalletService<N, L, T> {
    pub fn new(store: Arc<LedgerStore>, network: N, accounts: L, notifier: T) -> Self {
        Self {
            mover: FundMover::new(Arc::clone(&store), network, accounts),
            reconciler: SettlementReconciler::new(Arc::clone(&store), notifier),
            eligibility: BidEligibility::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// GET wallet: balances plus recent ledger entries, newest first.
    pub fn wallet_view(&self, user_id: UserId) -> WalletView {
        let wallet = self.store.get_or_create_wallet(user_id);
        WalletView {
            balance: wallet.balance,
            available: wallet.available(),
            frozen: wallet.frozen,
            recent: self.store.recent_transactions(wallet.id, RECENT_LIMIT),
        }
    }

    /// POST initiateDeposit.
    pub async fn initiate_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        linked_account_id: u64,
    ) -> Result<TransferTicket, FundMoveError> {
        self.mover
            .initiate_deposit(user_id, amount, linked_account_id)
            .await
    }

    /// POST initiateWithdrawal.
    pub async fn initiate_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
        linked_account_id: u64,
    ) -> Result<TransferTicket, FundMoveError> {
        self.mover
            .initiate_withdrawal(user_id, amount, linked_account_id)
            .await
    }

    /// GET canBid.
    pub fn can_bid(&self, user_id: UserId, auction_id: AuctionId) -> BidCheck {
        self.eligibility.can_bid(user_id, auction_id)
    }

    /// Operator override of an auction's bid requirement.
    pub fn set_bid_requirement(&self, auction_id: AuctionId, required: Amount) {
        self.eligibility.set_requirement(auction_id, required);
    }

    /// POST handleSettlementEvent, the network-facing webhook entry point.
    ///
    /// Always resolves to an acknowledgeable outcome, duplicates and
    /// anomalies included, so the network does not endlessly retry.
    pub async fn handle_settlement_event(
        &self,
        transfer_id: &str,
        new_status: SettlementStatus,
        failure_reason: Option<String>,
    ) -> ReconcileOutcome {
        self.reconciler
            .handle_event(&SettlementEvent {
                transfer_id: transfer_id.to_string(),
                new_status,
                failure_reason,
            })
            .await
    }

    /// The reconciler, for wiring an event stream (webhook queue, sandbox
    /// auto-settlement) into [`SettlementReconciler::run`].
    pub fn reconciler(&self) -> &SettlementReconciler<T> {
        &self.reconciler
    }

    /// Admin: decide a pending withdrawal.
    ///
    /// Approval completes the entry (the debit applies through the normal
    /// transition path); rejection cancels it and releases the hold.
    pub fn approve_withdrawal(
        &self,
        tx_id: TxId,
        approve: bool,
        notes: Option<String>,
        operator: &str,
    ) -> Result<Transaction, AdminActionError> {
        let tx = self.store.transaction(tx_id)?;
        if tx.kind != TxKind::Withdrawal {
            return Err(AdminActionError::NotAWithdrawal(tx_id));
        }
        if tx.status.is_terminal() {
            return Err(AdminActionError::AlreadyDecided {
                tx: tx_id,
                status: tx.status,
            });
        }

        let target = if approve {
            TxStatus::Completed
        } else {
            TxStatus::Cancelled
        };
        let decided = self.store.transition(
            tx_id,
            target,
            notes,
            Some(ProcessedBy::Operator(operator.to_string())),
        )?;
        info!(tx = tx_id, operator, approve, "withdrawal decided");
        Ok(decided)
    }

    /// Admin: synchronous credit outside the transfer network.
    ///
    /// Idempotent on `reference`, so a re-submitted form cannot double
    /// credit.
    pub fn manual_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        reference: &str,
        description: &str,
        operator: &str,
    ) -> Result<(Transaction, Wallet), LedgerError> {
        let wallet = self.store.get_or_create_wallet(user_id);
        self.store.record_completed_credit(
            wallet.id,
            amount,
            TxKind::Deposit,
            reference,
            description,
            Some(ProcessedBy::Operator(operator.to_string())),
        )
    }
}
