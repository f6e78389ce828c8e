use crate::Amount;
use crate::model::{UserId, WalletId};

/// A user's custodial balance record.
///
/// `balance` is everything settled in minus everything settled out;
/// `frozen` is the portion earmarked and unavailable for new commitments.
/// Invariant: `balance >= frozen >= 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Amount,
    pub frozen: Amount,
}

impl Wallet {
    pub fn new(id: WalletId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            balance: Amount::ZERO,
            frozen: Amount::ZERO,
        }
    }

    /// The portion usable for new commitments.
    pub fn available(&self) -> Amount {
        self.balance - self.frozen
    }

    pub(crate) fn credit(&mut self, amount: Amount) {
        self.balance += amount;
    }

    /// Caller must have checked `amount <= available()` (or, for a held
    /// withdrawal, released the hold first) inside the same critical section.
    pub(crate) fn debit(&mut self, amount: Amount) {
        self.balance -= amount;
    }

    pub(crate) fn hold(&mut self, amount: Amount) {
        self.frozen += amount;
    }

    pub(crate) fn release(&mut self, amount: Amount) {
        self.frozen -= amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_zeroed() {
        let wallet = Wallet::new(1, 42);
        assert_eq!(wallet.balance, Amount::ZERO);
        assert_eq!(wallet.frozen, Amount::ZERO);
        assert_eq!(wallet.available(), Amount::ZERO);
    }

    #[test]
    fn available_subtracts_frozen() {
        let mut wallet = Wallet::new(1, 42);
        wallet.credit(Amount::from_units(500));
        wallet.hold(Amount::from_units(200));

        assert_eq!(wallet.balance, Amount::from_units(500));
        assert_eq!(wallet.available(), Amount::from_units(300));
    }

    #[test]
    fn release_restores_available() {
        let mut wallet = Wallet::new(1, 42);
        wallet.credit(Amount::from_units(500));
        wallet.hold(Amount::from_units(200));
        wallet.release(Amount::from_units(200));

        assert_eq!(wallet.available(), Amount::from_units(500));
    }
}
