//! Seams to the external collaborators: the bank-transfer network, the
//! bank-account linking subsystem, and the notification subsystem.
//!
//! The engine consumes these behind traits so the web layer can inject the
//! real clients and tests can inject doubles. `SandboxNetwork` is the
//! built-in double; its auto-settlement posts events through the same
//! reconciler path production webhooks use.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use ulid::Ulid;

use crate::Amount;
use crate::model::{SettlementEvent, SettlementStatus, UserId};

/// Which way money moves relative to the user's bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Pull funds from the user's bank account (deposit).
    DebitUser,
    /// Push funds to the user's bank account (withdrawal).
    CreditUser,
}

/// A linked bank account as resolved by the account-linking subsystem.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub id: u64,
    pub owner: UserId,
    pub external_account_id: String,
    pub external_access_token: String,
    pub is_active: bool,
}

/// The network's acknowledgement of an accepted transfer.
#[derive(Debug, Clone)]
pub struct TransferAccepted {
    pub transfer_id: String,
    pub status: SettlementStatus,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transfer network rejected the request: {0}")]
    Rejected(String),
    #[error("transfer network unreachable: {0}")]
    Unreachable(String),
}

/// The external ACH processor's transfer API.
#[async_trait]
pub trait TransferNetwork: Send + Sync {
    async fn create_transfer(
        &self,
        direction: TransferDirection,
        account: &LinkedAccount,
        amount: Amount,
    ) -> Result<TransferAccepted, NetworkError>;
}

/// The bank-account linking subsystem.
#[async_trait]
pub trait LinkedAccounts: Send + Sync {
    /// Resolve a linked account id; `None` when it does not exist.
    async fn resolve(&self, account_id: u64) -> Option<LinkedAccount>;
}

/// Fire-and-forget user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, title: &str, message: &str);
}

/// Notifier that only logs; used by the replay binary and tests that do
/// not assert on notifications.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: UserId, title: &str, message: &str) {
        info!(user = user_id, title, message, "notification");
    }
}

/// In-memory account directory keyed by linked-account id.
#[derive(Default)]
pub struct StaticAccounts {
    accounts: HashMap<u64, LinkedAccount>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: LinkedAccount) -> Self {
        self.accounts.insert(account.id, account);
        self
    }

    /// An active account owned by `owner`, for wiring up demos and tests.
    pub fn active(id: u64, owner: UserId) -> LinkedAccount {
        LinkedAccount {
            id,
            owner,
            external_account_id: format!("acct_{id}"),
            external_access_token: format!("token_{id}"),
            is_active: true,
        }
    }
}

#[async_trait]
impl LinkedAccounts for StaticAccounts {
    async fn resolve(&self, account_id: u64) -> Option<LinkedAccount> {
        self.accounts.get(&account_id).cloned()
    }
}

/// Sandbox stand-in for the ACH processor.
///
/// Accepts every transfer and assigns `sandbox-<ulid>` ids. When built
/// with [`auto_settling`](SandboxNetwork::auto_settling), each accepted
/// transfer also schedules a Settled event on the given channel after the
/// configured delay, mimicking the out-of-band webhook.
pub struct SandboxNetwork {
    accepted: Mutex<Vec<(String, TransferDirection, Amount)>>,
    auto_settle: Option<(mpsc::Sender<SettlementEvent>, Duration)>,
}

impl SandboxNetwork {
    pub fn new() -> Self {
        Self {
            accepted: Mutex::new(Vec::new()),
            auto_settle: None,
        }
    }

    pub fn auto_settling(events: mpsc::Sender<SettlementEvent>, delay: Duration) -> Self {
        Self {
            accepted: Mutex::new(Vec::new()),
            auto_settle: Some((events, delay)),
        }
    }

    /// Transfer ids accepted so far, in order.
    pub fn accepted_ids(&self) -> Vec<String> {
        self.accepted
            .lock()
            .map(|log| log.iter().map(|(id, _, _)| id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for SandboxNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferNetwork for SandboxNetwork {
    async fn create_transfer(
        &self,
        direction: TransferDirection,
        account: &LinkedAccount,
        amount: Amount,
    ) -> Result<TransferAccepted, NetworkError> {
        if !account.is_active {
            return Err(NetworkError::Rejected("account inactive".to_string()));
        }

        let transfer_id = format!("sandbox-{}", Ulid::new());
        if let Ok(mut log) = self.accepted.lock() {
            log.push((transfer_id.clone(), direction, amount));
        }

        if let Some((events, delay)) = &self.auto_settle {
            let events = events.clone();
            let delay = *delay;
            let transfer_id = transfer_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events
                    .send(SettlementEvent {
                        transfer_id,
                        new_status: SettlementStatus::Settled,
                        failure_reason: None,
                    })
                    .await;
            });
        }

        Ok(TransferAccepted {
            transfer_id,
            status: SettlementStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sandbox_accepts_and_assigns_ids() {
        let network = SandboxNetwork::new();
        let account = StaticAccounts::active(1, 42);

        let accepted = network
            .create_transfer(TransferDirection::DebitUser, &account, Amount::from_units(100))
            .await
            .unwrap();

        assert!(accepted.transfer_id.starts_with("sandbox-"));
        assert_eq!(accepted.status, SettlementStatus::Pending);
        assert_eq!(network.accepted_ids().len(), 1);
    }

    #[tokio::test]
    async fn sandbox_rejects_inactive_account() {
        let network = SandboxNetwork::new();
        let mut account = StaticAccounts::active(1, 42);
        account.is_active = false;

        let result = network
            .create_transfer(TransferDirection::CreditUser, &account, Amount::from_units(100))
            .await;
        assert!(matches!(result, Err(NetworkError::Rejected(_))));
    }

    #[tokio::test]
    async fn auto_settling_emits_event_through_channel() {
        let (sender, mut receiver) = mpsc::channel(4);
        let network = SandboxNetwork::auto_settling(sender, Duration::from_millis(1));
        let account = StaticAccounts::active(1, 42);

        let accepted = network
            .create_transfer(TransferDirection::DebitUser, &account, Amount::from_units(100))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.transfer_id, accepted.transfer_id);
        assert_eq!(event.new_status, SettlementStatus::Settled);
    }

    #[tokio::test]
    async fn static_accounts_resolve() {
        let accounts = StaticAccounts::new().with_account(StaticAccounts::active(3, 9));

        assert!(accounts.resolve(3).await.is_some());
        assert!(accounts.resolve(4).await.is_none());
    }
}
