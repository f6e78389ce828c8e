//! The escrow ledger store.
//!
//! The only component permitted to mutate wallet balances or drive a
//! transaction to a terminal state. Every operation runs as one critical
//! section over the store state, so check-and-update on a wallet is atomic
//! with respect to every concurrent caller.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use crate::Amount;
use crate::model::{
    ProcessedBy, Reference, Transaction, TxId, TxKind, TxStatus, UserId, WalletId,
};

mod error;
pub use error::LedgerError;

mod wallet;
pub use wallet::Wallet;

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    wallets_by_user: HashMap<UserId, WalletId>,
    transactions: HashMap<TxId, Transaction>,
    by_reference: HashMap<Reference, TxId>,
    by_external_id: HashMap<String, TxId>,
    /// Amount held on the wallet for each in-flight debit entry.
    holds: HashMap<TxId, Amount>,
    next_wallet_id: WalletId,
    next_tx_id: TxId,
}

impl State {
    fn active_holds(&self, wallet_id: WalletId) -> Amount {
        self.holds
            .iter()
            .filter(|(tx_id, _)| {
                self.transactions
                    .get(tx_id)
                    .is_some_and(|tx| tx.wallet_id == wallet_id)
            })
            .fold(Amount::ZERO, |acc, (_, amount)| acc + *amount)
    }
}

/// Durable record of wallets and transactions.
///
/// Wallets are created lazily and never deleted; transactions are
/// append-only and immutable once terminal.
pub struct LedgerStore {
    state: Mutex<State>,
}

/// Public API
impl LedgerStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Return the wallet for `user_id`, creating a zero-balance one on
    /// first access.
    pub fn get_or_create_wallet(&self, user_id: UserId) -> Wallet {
        let mut state = self.lock();
        Self::wallet_entry(&mut state, user_id).clone()
    }

    /// Look up a wallet without creating it.
    pub fn wallet_for_user(&self, user_id: UserId) -> Option<Wallet> {
        let state = self.lock();
        let wallet_id = state.wallets_by_user.get(&user_id)?;
        state.wallets.get(wallet_id).cloned()
    }

    pub fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        let state = self.lock();
        state
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }

    pub fn transaction(&self, tx_id: TxId) -> Result<Transaction, LedgerError> {
        let state = self.lock();
        state
            .transactions
            .get(&tx_id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(tx_id))
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<Transaction> {
        let state = self.lock();
        let tx_id = state.by_reference.get(reference)?;
        state.transactions.get(tx_id).cloned()
    }

    pub fn find_by_external_id(&self, transfer_id: &str) -> Option<Transaction> {
        let state = self.lock();
        let tx_id = state.by_external_id.get(transfer_id)?;
        state.transactions.get(tx_id).cloned()
    }

    /// All wallets, ordered by user id.
    pub fn wallets(&self) -> Vec<Wallet> {
        let state = self.lock();
        let mut wallets: Vec<Wallet> = state.wallets.values().cloned().collect();
        wallets.sort_by_key(|wallet| wallet.user_id);
        wallets
    }

    /// Newest-first slice of a wallet's ledger entries.
    pub fn recent_transactions(&self, wallet_id: WalletId, limit: usize) -> Vec<Transaction> {
        let state = self.lock();
        let mut entries: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.truncate(limit);
        entries
    }

    /// Record an already-settled credit (admin deposit, compensating refund).
    ///
    /// A duplicate `reference` is an idempotent no-op returning the existing
    /// entry and current wallet, so re-delivered requests are safe.
    pub fn record_completed_credit(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        kind: TxKind,
        reference: &str,
        description: &str,
        processed_by: Option<ProcessedBy>,
    ) -> Result<(Transaction, Wallet), LedgerError> {
        if !kind.is_credit() {
            return Err(LedgerError::WrongKind(format!("{kind:?}")));
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let mut state = self.lock();
        if let Some(existing) = Self::existing_pair(&state, reference) {
            return Ok(existing);
        }

        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.credit(amount);
        let wallet = wallet.clone();

        let tx = Self::insert_transaction(
            &mut state,
            wallet_id,
            kind,
            amount,
            TxStatus::Completed,
            reference,
            description,
            processed_by,
        );
        info!(wallet = wallet_id, reference, amount = %amount, kind = ?kind, "credit applied");
        Ok((tx, wallet))
    }

    /// Record an already-settled debit (purchase, manually approved payout).
    ///
    /// Duplicate-reference idempotency as for credits. The available-funds
    /// check and the decrement happen in the same critical section.
    pub fn record_completed_debit(
        &self,
        wallet_id: WalletId,
        amount: Amount,
        kind: TxKind,
        reference: &str,
        description: &str,
        processed_by: Option<ProcessedBy>,
    ) -> Result<(Transaction, Wallet), LedgerError> {
        if kind.is_credit() {
            return Err(LedgerError::WrongKind(format!("{kind:?}")));
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let mut state = self.lock();
        if let Some(existing) = Self::existing_pair(&state, reference) {
            return Ok(existing);
        }

        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if amount > wallet.available() {
            return Err(LedgerError::InsufficientFunds {
                wallet: wallet_id,
                available: wallet.available(),
                requested: amount,
            });
        }
        wallet.debit(amount);
        let wallet = wallet.clone();

        let tx = Self::insert_transaction(
            &mut state,
            wallet_id,
            kind,
            amount,
            TxStatus::Completed,
            reference,
            description,
            processed_by,
        );
        info!(wallet = wallet_id, reference, amount = %amount, kind = ?kind, "debit applied");
        Ok((tx, wallet))
    }

    /// Create a Pending entry with no balance effect yet.
    ///
    /// A pending debit places a hold on the wallet (guarded by available
    /// balance) so two in-flight withdrawals cannot jointly overdraw.
    pub fn create_pending(
        &self,
        wallet_id: WalletId,
        kind: TxKind,
        amount: Amount,
        reference: &str,
        description: &str,
    ) -> Result<Transaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let mut state = self.lock();
        if state.by_reference.contains_key(reference) {
            return Err(LedgerError::DuplicateReference(reference.to_string()));
        }

        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if !kind.is_credit() {
            if amount > wallet.available() {
                return Err(LedgerError::InsufficientFunds {
                    wallet: wallet_id,
                    available: wallet.available(),
                    requested: amount,
                });
            }
            wallet.hold(amount);
        }

        let tx = Self::insert_transaction(
            &mut state,
            wallet_id,
            kind,
            amount,
            TxStatus::Pending,
            reference,
            description,
            None,
        );
        if !kind.is_credit() {
            state.holds.insert(tx.id, amount);
        }
        info!(wallet = wallet_id, reference, amount = %amount, kind = ?kind, "pending entry created");
        Ok(tx)
    }

    /// Link the transfer network's identifier to an entry.
    pub fn set_external_id(
        &self,
        tx_id: TxId,
        transfer_id: &str,
    ) -> Result<Transaction, LedgerError> {
        let mut state = self.lock();
        if let Some(owner) = state.by_external_id.get(transfer_id)
            && *owner != tx_id
        {
            return Err(LedgerError::DuplicateExternalId(transfer_id.to_string()));
        }

        let tx = state
            .transactions
            .get_mut(&tx_id)
            .ok_or(LedgerError::TransactionNotFound(tx_id))?;
        tx.external_transfer_id = Some(transfer_id.to_string());
        let tx = tx.clone();
        state.by_external_id.insert(transfer_id.to_string(), tx_id);
        Ok(tx)
    }

    /// Drive an entry through its status lifecycle.
    ///
    /// Legal transitions: Pending -> Processing, Pending/Processing -> any
    /// terminal status. Completing applies the balance effect: credit for
    /// Deposit/Refund, hold-release plus debit for Withdrawal/Purchase.
    /// Re-applying the current status is an idempotent no-op; a conflicting
    /// terminal target is refused with [`LedgerError::TerminalConflict`].
    pub fn transition(
        &self,
        tx_id: TxId,
        new_status: TxStatus,
        error_message: Option<String>,
        processed_by: Option<ProcessedBy>,
    ) -> Result<Transaction, LedgerError> {
        let mut state = self.lock();

        let current = state
            .transactions
            .get(&tx_id)
            .ok_or(LedgerError::TransactionNotFound(tx_id))?
            .status;

        if current == new_status {
            return Ok(state.transactions[&tx_id].clone());
        }
        if current.is_terminal() {
            return Err(LedgerError::TerminalConflict {
                tx: tx_id,
                current,
                requested: new_status,
            });
        }
        let legal = match (current, new_status) {
            (TxStatus::Pending, TxStatus::Processing) => true,
            (TxStatus::Pending | TxStatus::Processing, target) => target.is_terminal(),
            _ => false,
        };
        if !legal {
            return Err(LedgerError::IllegalTransition {
                tx: tx_id,
                from: current,
                to: new_status,
            });
        }

        let (wallet_id, kind, amount) = {
            let tx = &state.transactions[&tx_id];
            (tx.wallet_id, tx.kind, tx.amount)
        };

        // Balance effects first, so a guard failure leaves the entry untouched.
        if new_status.is_terminal() {
            let hold = state.holds.get(&tx_id).copied();
            let wallet = state
                .wallets
                .get_mut(&wallet_id)
                .ok_or(LedgerError::WalletNotFound(wallet_id))?;
            match (new_status, kind.is_credit()) {
                (TxStatus::Completed, true) => wallet.credit(amount),
                (TxStatus::Completed, false) => {
                    if amount > wallet.balance {
                        return Err(LedgerError::InsufficientFunds {
                            wallet: wallet_id,
                            available: wallet.available(),
                            requested: amount,
                        });
                    }
                    if let Some(hold) = hold {
                        wallet.release(hold);
                    }
                    wallet.debit(amount);
                }
                // Failed or cancelled debit: release the hold, nothing was spent.
                (_, false) => {
                    if let Some(hold) = hold {
                        wallet.release(hold);
                    }
                }
                // Failed or cancelled credit: nothing was ever applied.
                (_, true) => {}
            }
            state.holds.remove(&tx_id);
        }

        let tx = state
            .transactions
            .get_mut(&tx_id)
            .ok_or(LedgerError::TransactionNotFound(tx_id))?;
        tx.status = new_status;
        if new_status.is_terminal() {
            tx.processed_at = Some(Utc::now());
            if processed_by.is_some() {
                tx.processed_by = processed_by;
            }
            if matches!(new_status, TxStatus::Failed | TxStatus::Cancelled)
                && error_message.is_some()
            {
                tx.error_message = error_message;
            }
        }
        let tx = tx.clone();
        info!(
            tx = tx_id,
            wallet = wallet_id,
            from = ?current,
            to = ?new_status,
            "transaction transitioned"
        );
        Ok(tx)
    }

    /// Earmark part of the balance, e.g. for an accepted bid.
    pub fn freeze(&self, wallet_id: WalletId, amount: Amount) -> Result<Wallet, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut state = self.lock();
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if wallet.frozen + amount > wallet.balance {
            return Err(LedgerError::InvalidFreezeAmount {
                wallet: wallet_id,
                amount,
            });
        }
        wallet.hold(amount);
        Ok(wallet.clone())
    }

    /// Release earmarked funds. Holds placed for in-flight withdrawals
    /// cannot be released this way.
    pub fn unfreeze(&self, wallet_id: WalletId, amount: Amount) -> Result<Wallet, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut state = self.lock();
        let reserved = state.active_holds(wallet_id);
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if amount > wallet.frozen - reserved {
            return Err(LedgerError::InvalidFreezeAmount {
                wallet: wallet_id,
                amount,
            });
        }
        wallet.release(amount);
        Ok(wallet.clone())
    }
}

/// Private API
impl LedgerStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("ledger state mutex poisoned, continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    fn wallet_entry(state: &mut State, user_id: UserId) -> &mut Wallet {
        if let Some(wallet_id) = state.wallets_by_user.get(&user_id).copied() {
            return state
                .wallets
                .get_mut(&wallet_id)
                .unwrap_or_else(|| unreachable!("wallet index out of sync"));
        }
        state.next_wallet_id += 1;
        let wallet_id = state.next_wallet_id;
        state.wallets_by_user.insert(user_id, wallet_id);
        state
            .wallets
            .entry(wallet_id)
            .or_insert_with(|| Wallet::new(wallet_id, user_id))
    }

    fn existing_pair(state: &State, reference: &str) -> Option<(Transaction, Wallet)> {
        let tx_id = state.by_reference.get(reference)?;
        let tx = state.transactions.get(tx_id)?.clone();
        let wallet = state.wallets.get(&tx.wallet_id)?.clone();
        info!(reference, tx = tx.id, "duplicate reference, returning prior result");
        Some((tx, wallet))
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_transaction(
        state: &mut State,
        wallet_id: WalletId,
        kind: TxKind,
        amount: Amount,
        status: TxStatus,
        reference: &str,
        description: &str,
        processed_by: Option<ProcessedBy>,
    ) -> Transaction {
        state.next_tx_id += 1;
        let now = Utc::now();
        let tx = Transaction {
            id: state.next_tx_id,
            wallet_id,
            kind,
            amount,
            status,
            reference: reference.to_string(),
            external_transfer_id: None,
            description: description.to_string(),
            created_at: now,
            processed_at: status.is_terminal().then_some(now),
            auction_id: None,
            bid_id: None,
            processed_by,
            error_message: None,
        };
        state.by_reference.insert(reference.to_string(), tx.id);
        state.transactions.insert(tx.id, tx.clone());
        tx
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
