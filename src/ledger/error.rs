//! Error types for ledger store operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{Reference, TxId, TxStatus, WalletId};

/// Error returned by [`LedgerStore`](super::LedgerStore) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),

    #[error("reference '{0}' already used by another transaction")]
    DuplicateReference(Reference),

    #[error("external transfer id '{0}' already linked to another transaction")]
    DuplicateExternalId(String),

    #[error(
        "insufficient funds in wallet {wallet}: available {available}, requested {requested}"
    )]
    InsufficientFunds {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },

    #[error("illegal status transition {from:?} -> {to:?} for transaction {tx}")]
    IllegalTransition {
        tx: TxId,
        from: TxStatus,
        to: TxStatus,
    },

    #[error(
        "transaction {tx} is terminal in {current:?}, refusing conflicting target {requested:?}"
    )]
    TerminalConflict {
        tx: TxId,
        current: TxStatus,
        requested: TxStatus,
    },

    #[error("freeze adjustment of {amount} would leave wallet {wallet} outside [0, balance]")]
    InvalidFreezeAmount { wallet: WalletId, amount: Amount },

    #[error("amount {0} must be positive")]
    NonPositiveAmount(Amount),

    #[error("kind {0} is not valid for this operation")]
    WrongKind(String),
}
