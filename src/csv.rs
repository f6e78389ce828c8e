//! CSV input/output for the scenario-replay binary.
//!
//! Rows are `op,user,amount,label`: `deposit` and `withdrawal` initiate a
//! transfer and bind its network id to `label`, `settle`/`fail` deliver the
//! corresponding settlement event, `manual_deposit` is the admin credit
//! path. Wallet state is written back out as `user,balance,frozen,available`.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::UserId;
use crate::{Amount, Wallet};

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized op '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

/// One step of a replay scenario.
#[derive(Debug, Clone)]
pub enum ReplayOp {
    Deposit {
        user: UserId,
        amount: Amount,
        label: String,
    },
    Withdrawal {
        user: UserId,
        amount: Amount,
        label: String,
    },
    /// Deliver a settled event for the transfer bound to `label`.
    Settle { label: String },
    /// Deliver a failed event for the transfer bound to `label`.
    Fail { label: String },
    ManualDeposit {
        user: UserId,
        amount: Amount,
        label: String,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    user: Option<UserId>,
    amount: Option<f64>,
    label: String,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    balance: String,
    frozen: String,
    available: String,
}

/// Read replay ops from a csv file
pub fn read_ops(path: impl AsRef<Path>) -> impl Iterator<Item = Result<ReplayOp, ReplayError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open csv file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| ReplayError::Parse { line, source })?;
            let funded = |row: &InputRow| -> Result<(UserId, Amount), ReplayError> {
                let user = row.user.ok_or(ReplayError::MissingField {
                    line,
                    op: row.op.clone(),
                    field: "user",
                })?;
                let amount = row.amount.ok_or(ReplayError::MissingField {
                    line,
                    op: row.op.clone(),
                    field: "amount",
                })?;
                Ok((user, Amount::from_float(amount)))
            };
            match row.op.as_str() {
                "deposit" => {
                    let (user, amount) = funded(&row)?;
                    Ok(ReplayOp::Deposit {
                        user,
                        amount,
                        label: row.label,
                    })
                }
                "withdrawal" => {
                    let (user, amount) = funded(&row)?;
                    Ok(ReplayOp::Withdrawal {
                        user,
                        amount,
                        label: row.label,
                    })
                }
                "settle" => Ok(ReplayOp::Settle { label: row.label }),
                "fail" => Ok(ReplayOp::Fail { label: row.label }),
                "manual_deposit" => {
                    let (user, amount) = funded(&row)?;
                    Ok(ReplayOp::ManualDeposit {
                        user,
                        amount,
                        label: row.label,
                    })
                }
                other => Err(ReplayError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                }),
            }
        })
}

/// Write wallet states to stdout in csv format
pub fn write_wallets(wallets: impl IntoIterator<Item = Wallet>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for wallet in wallets {
        let row = OutputRow {
            user: wallet.user_id,
            balance: wallet.balance.to_string(),
            frozen: wallet.frozen.to_string(),
            available: wallet.available().to_string(),
        };
        writer.serialize(&row).expect("failed to write csv row");
    }

    writer.flush().expect("failed to flush csv writer");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn read_deposit() {
        let file = write_csv("op,user,amount,label\ndeposit,42,500.0,d1\n");
        let results: Vec<_> = read_ops(file.path()).collect();
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            ReplayOp::Deposit {
                user,
                amount,
                label,
            } => {
                assert_eq!(user, 42);
                assert_eq!(amount, Amount::from_float(500.0));
                assert_eq!(label, "d1");
            }
            other => panic!("expected deposit, got {other:?}"),
        }
    }

    #[test]
    fn read_settle_without_user_or_amount() {
        let file = write_csv("op,user,amount,label\nsettle,,,d1\n");
        let results: Vec<_> = read_ops(file.path()).collect();
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            ReplayOp::Settle { label } => assert_eq!(label, "d1"),
            other => panic!("expected settle, got {other:?}"),
        }
    }

    #[test]
    fn read_with_whitespace() {
        let file = write_csv("op, user, amount, label\nwithdrawal, 42, 200.0, w1\n");
        let results: Vec<_> = read_ops(file.path()).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn read_returns_error_for_unknown_op() {
        let file = write_csv("op,user,amount,label\nchargeback,42,10.0,x\n");
        let results: Vec<_> = read_ops(file.path()).collect();
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, ReplayError::UnrecognizedOp { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_amount() {
        let file = write_csv("op,user,amount,label\ndeposit,42,,d1\n");
        let results: Vec<_> = read_ops(file.path()).collect();
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(
            err,
            ReplayError::MissingField {
                line: 2,
                field: "amount",
                ..
            }
        ));
    }
}
