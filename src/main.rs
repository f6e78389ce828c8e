use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use escrow_eng::csv::{ReplayOp, read_ops, write_wallets};
use escrow_eng::model::SettlementStatus;
use escrow_eng::transfer::{
    LinkedAccount, LinkedAccounts, LogNotifier, SandboxNetwork, StaticAccounts,
};
use escrow_eng::{LedgerStore, WalletService};

/// Replay scenarios address accounts by user id; every user gets an active
/// linked account with the same id.
struct ReplayAccounts;

#[async_trait]
impl LinkedAccounts for ReplayAccounts {
    async fn resolve(&self, account_id: u64) -> Option<LinkedAccount> {
        Some(StaticAccounts::active(account_id, account_id))
    }
}

type ReplayService = WalletService<SandboxNetwork, ReplayAccounts, LogNotifier>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: escrow-eng <scenario.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let service = WalletService::new(
        Arc::new(LedgerStore::new()),
        SandboxNetwork::new(),
        ReplayAccounts,
        LogNotifier,
    );

    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in read_ops(&path) {
            match result {
                Ok(op) => {
                    op_sender.send(op).await.unwrap();
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let mut ops = ReceiverStream::new(op_receiver);
    // Fixture label -> network transfer id, bound at initiation.
    let mut transfers: HashMap<String, String> = HashMap::new();
    while let Some(op) = ops.next().await {
        apply(&service, &mut transfers, op).await;
    }

    write_wallets(service.store().wallets());
}

/// Apply one replay op; failures warn and never stop the replay.
async fn apply(service: &ReplayService, transfers: &mut HashMap<String, String>, op: ReplayOp) {
    match op {
        ReplayOp::Deposit {
            user,
            amount,
            label,
        } => match service.initiate_deposit(user, amount, user).await {
            Ok(ticket) => {
                if let Some(id) = ticket.external_transfer_id {
                    transfers.insert(label, id);
                }
            }
            Err(e) => warn!(user, label, error = %e, "deposit skipped"),
        },
        ReplayOp::Withdrawal {
            user,
            amount,
            label,
        } => match service.initiate_withdrawal(user, amount, user).await {
            Ok(ticket) => {
                if let Some(id) = ticket.external_transfer_id {
                    transfers.insert(label, id);
                }
            }
            Err(e) => warn!(user, label, error = %e, "withdrawal skipped"),
        },
        ReplayOp::Settle { label } => {
            deliver(service, transfers, &label, SettlementStatus::Settled).await;
        }
        ReplayOp::Fail { label } => {
            deliver(service, transfers, &label, SettlementStatus::Failed).await;
        }
        ReplayOp::ManualDeposit {
            user,
            amount,
            label,
        } => {
            if let Err(e) = service.manual_deposit(user, amount, &label, "manual deposit", "replay")
            {
                warn!(user, label, error = %e, "manual deposit skipped");
            }
        }
    }
}

async fn deliver(
    service: &ReplayService,
    transfers: &HashMap<String, String>,
    label: &str,
    status: SettlementStatus,
) {
    match transfers.get(label) {
        Some(transfer_id) => {
            service
                .handle_settlement_event(transfer_id, status, None)
                .await;
        }
        None => warn!(label, "no transfer bound to label"),
    }
}
