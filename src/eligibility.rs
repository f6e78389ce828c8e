//! Read-only bid eligibility checks.
//!
//! Answers "can this user afford to bid on auction X" from the wallet's
//! available balance and a per-auction requirement, lazily created with
//! the platform default. Never freezes or reserves funds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::Amount;
use crate::ledger::LedgerStore;
use crate::model::{AuctionId, UserId};

/// Platform-wide minimum available balance required to bid, in currency
/// units, used when an auction has no explicit requirement.
pub const DEFAULT_REQUIRED: Amount = Amount::from_units(5_000);

/// The answer to an eligibility query.
#[derive(Debug, Clone, PartialEq)]
pub struct BidCheck {
    pub eligible: bool,
    pub available: Amount,
    pub required: Amount,
    /// How much more the user would need; zero when eligible.
    pub shortfall: Amount,
}

/// Evaluates bid eligibility against wallet state.
pub struct BidEligibility {
    store: Arc<LedgerStore>,
    requirements: Mutex<HashMap<AuctionId, Amount>>,
    default_required: Amount,
}

impl BidEligibility {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self::with_default(store, DEFAULT_REQUIRED)
    }

    pub fn with_default(store: Arc<LedgerStore>, default_required: Amount) -> Self {
        Self {
            store,
            requirements: Mutex::new(HashMap::new()),
            default_required,
        }
    }

    /// Pure function of current wallet state and the auction's requirement.
    pub fn can_bid(&self, user_id: UserId, auction_id: AuctionId) -> BidCheck {
        let required = self.requirement(auction_id);
        let available = self
            .store
            .wallet_for_user(user_id)
            .map(|wallet| wallet.available())
            .unwrap_or(Amount::ZERO);

        let eligible = available >= required;
        BidCheck {
            eligible,
            available,
            required,
            shortfall: if eligible {
                Amount::ZERO
            } else {
                required - available
            },
        }
    }

    /// Operator override of an auction's requirement.
    pub fn set_requirement(&self, auction_id: AuctionId, required: Amount) {
        info!(auction = auction_id, required = %required, "bid requirement set");
        if let Ok(mut requirements) = self.requirements.lock() {
            requirements.insert(auction_id, required);
        }
    }

    /// The auction's requirement, recorded with the platform default on
    /// first query.
    fn requirement(&self, auction_id: AuctionId) -> Amount {
        match self.requirements.lock() {
            Ok(mut requirements) => *requirements
                .entry(auction_id)
                .or_insert(self.default_required),
            Err(_) => self.default_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxKind;

    fn units(value: i64) -> Amount {
        Amount::from_units(value)
    }

    fn store_with_balance(user: UserId, balance: Amount) -> Arc<LedgerStore> {
        let store = Arc::new(LedgerStore::new());
        let wallet = store.get_or_create_wallet(user);
        if balance.is_positive() {
            store
                .record_completed_credit(wallet.id, balance, TxKind::Deposit, "seed", "", None)
                .unwrap();
        }
        store
    }

    #[test]
    fn eligible_at_exactly_the_default() {
        let store = store_with_balance(1, units(5_000));
        let eligibility = BidEligibility::new(store);

        let check = eligibility.can_bid(1, 10);
        assert!(check.eligible);
        assert_eq!(check.required, DEFAULT_REQUIRED);
        assert_eq!(check.shortfall, Amount::ZERO);
    }

    #[test]
    fn one_unit_short_of_the_default() {
        let store = store_with_balance(1, units(4_999));
        let eligibility = BidEligibility::new(store);

        let check = eligibility.can_bid(1, 10);
        assert!(!check.eligible);
        assert_eq!(check.available, units(4_999));
        assert_eq!(check.shortfall, units(1));
    }

    #[test]
    fn override_replaces_default() {
        let store = store_with_balance(1, units(1_000));
        let eligibility = BidEligibility::new(store);
        eligibility.set_requirement(10, units(500));

        let check = eligibility.can_bid(1, 10);
        assert!(check.eligible);
        assert_eq!(check.required, units(500));

        // Other auctions still use the default.
        assert!(!eligibility.can_bid(1, 11).eligible);
    }

    #[test]
    fn frozen_funds_do_not_count() {
        let store = store_with_balance(1, units(6_000));
        let wallet = store.wallet_for_user(1).unwrap();
        store.freeze(wallet.id, units(2_000)).unwrap();
        let eligibility = BidEligibility::new(Arc::clone(&store));

        let check = eligibility.can_bid(1, 10);
        assert!(!check.eligible);
        assert_eq!(check.available, units(4_000));
        assert_eq!(check.shortfall, units(1_000));
    }

    #[test]
    fn user_without_wallet_has_zero_available() {
        let store = Arc::new(LedgerStore::new());
        let eligibility = BidEligibility::new(store);

        let check = eligibility.can_bid(99, 10);
        assert!(!check.eligible);
        assert_eq!(check.available, Amount::ZERO);
        assert_eq!(check.shortfall, DEFAULT_REQUIRED);
    }

    #[test]
    fn zero_requirement_always_eligible() {
        let store = Arc::new(LedgerStore::new());
        let eligibility = BidEligibility::new(Arc::clone(&store));
        eligibility.set_requirement(10, Amount::ZERO);

        assert!(eligibility.can_bid(99, 10).eligible);
    }
}
