use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Add,
    Deduct,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Add => "add",
            TransactionKind::Deduct => "deduct",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(TransactionKind::Add),
            "deduct" => Ok(TransactionKind::Deduct),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Append-only ledger entry. Positive amounts credit, negative amounts debit.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    #[serde(with = "money::rupees")]
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub note: String,
    pub timestamp: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub user_id: i64,
    pub amount: i64,
    pub kind: TransactionKind,
    pub note: String,
}

impl NewTransaction {
    pub fn credit(user_id: i64, amount: i64, note: impl Into<String>) -> Self {
        NewTransaction {
            user_id,
            amount,
            kind: TransactionKind::Add,
            note: note.into(),
        }
    }

    pub fn debit(user_id: i64, amount: i64, note: impl Into<String>) -> Self {
        NewTransaction {
            user_id,
            amount: -amount,
            kind: TransactionKind::Deduct,
            note: note.into(),
        }
    }
}
