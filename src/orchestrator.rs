//! Fund movement orchestration: turns a user's deposit or withdrawal
//! request into a pending ledger entry plus an outbound transfer-network
//! call, linked by a generated reference.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use ulid::Ulid;

use crate::Amount;
use crate::ledger::{LedgerError, LedgerStore};
use crate::model::{TransferTicket, TxId, TxKind, TxStatus, UserId};
use crate::transfer::{
    LinkedAccount, LinkedAccounts, NetworkError, TransferDirection, TransferNetwork,
};

/// Smallest transfer the platform accepts, in currency units.
pub const MIN_TRANSFER: Amount = Amount::from_units(100);
/// Largest transfer the platform accepts, in currency units.
pub const MAX_TRANSFER: Amount = Amount::from_units(50_000);

#[derive(Debug, Error)]
pub enum FundMoveError {
    #[error("amount {amount} outside allowed range [{MIN_TRANSFER}, {MAX_TRANSFER}]")]
    InvalidAmount { amount: Amount },

    #[error("linked account {0} not found or not usable")]
    AccountNotFound(u64),

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Amount,
        requested: Amount,
    },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for FundMoveError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                available,
                requested,
                ..
            } => FundMoveError::InsufficientFunds {
                available,
                requested,
            },
            other => FundMoveError::Ledger(other),
        }
    }
}

/// Initiates deposits and withdrawals against the transfer network.
///
/// Initiation never applies a balance credit or debit; settlement events
/// consumed by the reconciler do that. A withdrawal does place a hold on
/// the wallet (via the ledger's pending-entry rules) so a second
/// initiation cannot jointly overdraw.
pub struct FundMover<N, L> {
    store: Arc<LedgerStore>,
    network: N,
    accounts: L,
}

impl<N: TransferNetwork, L: LinkedAccounts> FundMover<N, L> {
    pub fn new(store: Arc<LedgerStore>, network: N, accounts: L) -> Self {
        Self {
            store,
            network,
            accounts,
        }
    }

    pub async fn initiate_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        linked_account_id: u64,
    ) -> Result<TransferTicket, FundMoveError> {
        Self::check_bounds(amount)?;
        let account = self.usable_account(user_id, linked_account_id).await?;

        let wallet = self.store.get_or_create_wallet(user_id);
        let reference = format!("dep-{}", Ulid::new());
        let tx = self.store.create_pending(
            wallet.id,
            TxKind::Deposit,
            amount,
            &reference,
            "deposit via linked bank account",
        )?;

        self.dispatch(user_id, tx.id, &reference, TransferDirection::DebitUser, &account, amount)
            .await
    }

    pub async fn initiate_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
        linked_account_id: u64,
    ) -> Result<TransferTicket, FundMoveError> {
        Self::check_bounds(amount)?;
        let account = self.usable_account(user_id, linked_account_id).await?;

        let wallet = self.store.get_or_create_wallet(user_id);
        // Best-effort pre-check; the ledger re-checks inside the pending
        // entry's critical section.
        if amount > wallet.available() {
            return Err(FundMoveError::InsufficientFunds {
                available: wallet.available(),
                requested: amount,
            });
        }

        let reference = format!("wdr-{}", Ulid::new());
        let tx = self.store.create_pending(
            wallet.id,
            TxKind::Withdrawal,
            amount,
            &reference,
            "withdrawal to linked bank account",
        )?;

        self.dispatch(user_id, tx.id, &reference, TransferDirection::CreditUser, &account, amount)
            .await
    }
}

impl<N: TransferNetwork, L: LinkedAccounts> FundMover<N, L> {
    fn check_bounds(amount: Amount) -> Result<(), FundMoveError> {
        if amount < MIN_TRANSFER || amount > MAX_TRANSFER {
            return Err(FundMoveError::InvalidAmount { amount });
        }
        Ok(())
    }

    async fn usable_account(
        &self,
        user_id: UserId,
        linked_account_id: u64,
    ) -> Result<LinkedAccount, FundMoveError> {
        match self.accounts.resolve(linked_account_id).await {
            Some(account) if account.owner == user_id && account.is_active => Ok(account),
            _ => Err(FundMoveError::AccountNotFound(linked_account_id)),
        }
    }

    /// Send the outbound transfer and link its id, failing the ledger
    /// entry when the network refuses.
    async fn dispatch(
        &self,
        user_id: UserId,
        tx_id: TxId,
        reference: &str,
        direction: TransferDirection,
        account: &LinkedAccount,
        amount: Amount,
    ) -> Result<TransferTicket, FundMoveError> {
        match self.network.create_transfer(direction, account, amount).await {
            Ok(accepted) => {
                let tx = self.store.set_external_id(tx_id, &accepted.transfer_id)?;
                info!(
                    user = user_id,
                    reference,
                    transfer = accepted.transfer_id,
                    amount = %amount,
                    "transfer initiated"
                );
                Ok(TransferTicket::from_transaction(&tx))
            }
            Err(err) => {
                warn!(user = user_id, reference, error = %err, "transfer network refused");
                // Releases the withdrawal hold, if any.
                self.store
                    .transition(tx_id, TxStatus::Failed, Some(err.to_string()), None)?;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::transfer::{LinkedAccount, SandboxNetwork, StaticAccounts, TransferAccepted};

    struct DownNetwork;

    #[async_trait]
    impl TransferNetwork for DownNetwork {
        async fn create_transfer(
            &self,
            _direction: TransferDirection,
            _account: &LinkedAccount,
            _amount: Amount,
        ) -> Result<TransferAccepted, NetworkError> {
            Err(NetworkError::Unreachable("connection refused".to_string()))
        }
    }

    fn mover(store: Arc<LedgerStore>) -> FundMover<SandboxNetwork, StaticAccounts> {
        FundMover::new(
            store,
            SandboxNetwork::new(),
            StaticAccounts::new().with_account(StaticAccounts::active(1, 42)),
        )
    }

    fn units(value: i64) -> Amount {
        Amount::from_units(value)
    }

    #[tokio::test]
    async fn deposit_creates_pending_entry_with_transfer_id() {
        let store = Arc::new(LedgerStore::new());
        let mover = mover(Arc::clone(&store));

        let ticket = mover.initiate_deposit(42, units(500), 1).await.unwrap();

        assert_eq!(ticket.status, TxStatus::Pending);
        assert!(ticket.reference.starts_with("dep-"));
        let tx = store.find_by_reference(&ticket.reference).unwrap();
        assert_eq!(tx.external_transfer_id, ticket.external_transfer_id);
        // No credit until settlement.
        assert_eq!(store.wallet_for_user(42).unwrap().balance, Amount::ZERO);
    }

    #[tokio::test]
    async fn deposit_amount_bounds_enforced() {
        let store = Arc::new(LedgerStore::new());
        let mover = mover(store);

        for amount in [units(99), units(50_001)] {
            let result = mover.initiate_deposit(42, amount, 1).await;
            assert!(matches!(result, Err(FundMoveError::InvalidAmount { .. })));
        }
        assert!(mover.initiate_deposit(42, units(100), 1).await.is_ok());
        assert!(mover.initiate_deposit(42, units(50_000), 1).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_or_foreign_account_rejected() {
        let store = Arc::new(LedgerStore::new());
        let mover = mover(store);

        let result = mover.initiate_deposit(42, units(500), 9).await;
        assert!(matches!(result, Err(FundMoveError::AccountNotFound(9))));

        // Account 1 belongs to user 42, not 43.
        let result = mover.initiate_deposit(43, units(500), 1).await;
        assert!(matches!(result, Err(FundMoveError::AccountNotFound(1))));
    }

    #[tokio::test]
    async fn inactive_account_rejected() {
        let store = Arc::new(LedgerStore::new());
        let mut account = StaticAccounts::active(1, 42);
        account.is_active = false;
        let mover = FundMover::new(
            store,
            SandboxNetwork::new(),
            StaticAccounts::new().with_account(account),
        );

        let result = mover.initiate_deposit(42, units(500), 1).await;
        assert!(matches!(result, Err(FundMoveError::AccountNotFound(1))));
    }

    #[tokio::test]
    async fn withdrawal_requires_available_funds() {
        let store = Arc::new(LedgerStore::new());
        let wallet = store.get_or_create_wallet(42);
        store
            .record_completed_credit(wallet.id, units(300), TxKind::Deposit, "seed", "", None)
            .unwrap();
        let mover = mover(Arc::clone(&store));

        let result = mover.initiate_withdrawal(42, units(400), 1).await;
        assert!(matches!(
            result,
            Err(FundMoveError::InsufficientFunds { .. })
        ));

        let ticket = mover.initiate_withdrawal(42, units(200), 1).await.unwrap();
        assert_eq!(ticket.status, TxStatus::Pending);
        // Hold placed, balance untouched.
        let wallet = store.wallet_for_user(42).unwrap();
        assert_eq!(wallet.balance, units(300));
        assert_eq!(wallet.available(), units(100));
    }

    #[tokio::test]
    async fn two_withdrawals_cannot_jointly_overdraw() {
        let store = Arc::new(LedgerStore::new());
        let wallet = store.get_or_create_wallet(42);
        store
            .record_completed_credit(wallet.id, units(500), TxKind::Deposit, "seed", "", None)
            .unwrap();
        let mover = mover(Arc::clone(&store));

        mover.initiate_withdrawal(42, units(400), 1).await.unwrap();
        let result = mover.initiate_withdrawal(42, units(200), 1).await;

        assert!(matches!(
            result,
            Err(FundMoveError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn network_failure_fails_entry_and_releases_hold() {
        let store = Arc::new(LedgerStore::new());
        let wallet = store.get_or_create_wallet(42);
        store
            .record_completed_credit(wallet.id, units(500), TxKind::Deposit, "seed", "", None)
            .unwrap();
        let mover = FundMover::new(
            Arc::clone(&store),
            DownNetwork,
            StaticAccounts::new().with_account(StaticAccounts::active(1, 42)),
        );

        let result = mover.initiate_withdrawal(42, units(200), 1).await;
        assert!(matches!(result, Err(FundMoveError::Network(_))));

        let wallet = store.wallet_for_user(42).unwrap();
        assert_eq!(wallet.balance, units(500));
        assert_eq!(wallet.frozen, Amount::ZERO);

        let failed = store.recent_transactions(wallet.id, 1).remove(0);
        assert_eq!(failed.status, TxStatus::Failed);
        assert!(failed.error_message.is_some());
    }
}
