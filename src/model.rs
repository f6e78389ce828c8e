//! Core domain types for the escrow ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// User identifier, supplied by the auth layer.
pub type UserId = u64;

/// Wallet identifier, assigned by the ledger store.
pub type WalletId = u64;

/// Ledger transaction identifier, assigned by the ledger store.
pub type TxId = u64;

/// Auction identifier, supplied by the auction subsystem.
pub type AuctionId = u64;

/// Caller-supplied idempotency key, unique per logical operation.
pub type Reference = String;

/// The kind of fund movement a ledger entry records.
///
/// Amounts are always stored positive; the kind implies the sign of the
/// balance effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Funds moving in from the transfer network.
    Deposit,
    /// Funds moving out to the transfer network.
    Withdrawal,
    /// Funds spent on a won auction.
    Purchase,
    /// Compensating credit reversing a prior debit.
    Refund,
}

impl TxKind {
    /// Whether a completed entry of this kind credits the wallet.
    pub fn is_credit(&self) -> bool {
        matches!(self, TxKind::Deposit | TxKind::Refund)
    }
}

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Created, no balance effect yet, awaiting the transfer network.
    Pending,
    /// The transfer network acknowledged the transfer is in flight.
    Processing,
    /// Settled; the balance effect has been applied.
    Completed,
    /// The transfer failed; terminal.
    Failed,
    /// Cancelled before settlement; terminal.
    Cancelled,
}

impl TxStatus {
    /// Terminal statuses are immutable once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Completed | TxStatus::Failed | TxStatus::Cancelled
        )
    }
}

/// Who drove a ledger entry to its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessedBy {
    /// A named back-office operator.
    Operator(String),
    /// The settlement reconciler acting on a network event.
    AutomatedSystem,
}

/// An append-only ledger entry recording a single fund movement.
///
/// Owned by exactly one wallet. Once `status` is terminal the entry is
/// immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub wallet_id: WalletId,
    pub kind: TxKind,
    pub amount: Amount,
    pub status: TxStatus,
    /// Idempotency key, unique across all entries.
    pub reference: Reference,
    /// Identifier assigned by the transfer network, unique when present.
    pub external_transfer_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Set when the entry reaches a terminal status.
    pub processed_at: Option<DateTime<Utc>>,
    /// Auction context for Purchase entries.
    pub auction_id: Option<AuctionId>,
    pub bid_id: Option<u64>,
    pub processed_by: Option<ProcessedBy>,
    /// Failure detail, populated when the entry fails.
    pub error_message: Option<String>,
}

/// Status reported by the transfer network for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Settled,
    Failed,
    Cancelled,
}

/// An asynchronous delivery-status event from the transfer network.
///
/// Delivered at-least-once, possibly out of order and possibly duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// The network's transfer identifier.
    pub transfer_id: String,
    pub new_status: SettlementStatus,
    pub failure_reason: Option<String>,
}

/// Snapshot returned to the caller when a transfer is initiated.
///
/// One-to-one with the ledger entry it backs, matched by `reference`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTicket {
    pub reference: Reference,
    pub kind: TxKind,
    pub amount: Amount,
    pub status: TxStatus,
    pub external_transfer_id: Option<String>,
}

impl TransferTicket {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            reference: tx.reference.clone(),
            kind: tx.kind,
            amount: tx.amount,
            status: tx.status,
            external_transfer_id: tx.external_transfer_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Cancelled.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Processing.is_terminal());
    }

    #[test]
    fn credit_kinds() {
        assert!(TxKind::Deposit.is_credit());
        assert!(TxKind::Refund.is_credit());
        assert!(!TxKind::Withdrawal.is_credit());
        assert!(!TxKind::Purchase.is_credit());
    }

    #[test]
    fn ticket_mirrors_transaction() {
        let tx = Transaction {
            id: 1,
            wallet_id: 7,
            kind: TxKind::Deposit,
            amount: Amount::from_units(250),
            status: TxStatus::Pending,
            reference: "ref-1".to_string(),
            external_transfer_id: Some("tr_abc".to_string()),
            description: "deposit".to_string(),
            created_at: Utc::now(),
            processed_at: None,
            auction_id: None,
            bid_id: None,
            processed_by: None,
            error_message: None,
        };

        let ticket = TransferTicket::from_transaction(&tx);
        assert_eq!(ticket.reference, "ref-1");
        assert_eq!(ticket.kind, TxKind::Deposit);
        assert_eq!(ticket.amount, Amount::from_units(250));
        assert_eq!(ticket.status, TxStatus::Pending);
        assert_eq!(ticket.external_transfer_id.as_deref(), Some("tr_abc"));
    }
}
