pub mod amount;
pub mod csv;
pub mod eligibility;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod reconciler;
pub mod service;
pub mod transfer;

pub use amount::Amount;
pub use ledger::{LedgerError, LedgerStore, Wallet};
pub use model::{SettlementEvent, SettlementStatus, Transaction, TxKind, TxStatus, UserId};
pub use service::WalletService;
