use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::money;
use super::users::UserBalance;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl BalanceRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceRequestStatus::Pending => "pending",
            BalanceRequestStatus::Approved => "approved",
            BalanceRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BalanceRequestStatus::Pending)
    }
}

impl fmt::Display for BalanceRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BalanceRequestStatus::Pending),
            "approved" => Ok(BalanceRequestStatus::Approved),
            "rejected" => Ok(BalanceRequestStatus::Rejected),
            other => Err(format!("unknown balance request status: {}", other)),
        }
    }
}

/// A user's claim of an off-platform UPI transfer, credited only once an
/// admin approves it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequest {
    pub id: i64,
    pub user_id: i64,
    #[serde(with = "money::rupees")]
    pub amount: i64,
    pub utr_number: String,
    pub status: BalanceRequestStatus,
    pub timestamp: chrono::NaiveDateTime,
    pub approved_by: Option<i64>,
    pub approved_at: Option<chrono::NaiveDateTime>,
}

#[derive(Clone, Debug)]
pub struct NewBalanceRequest {
    pub user_id: i64,
    pub amount: i64,
    pub utr_number: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequestSubmission {
    pub amount: Option<serde_json::Value>,
    pub utr_number: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BalanceRequestFilter {
    pub status: Option<BalanceRequestStatus>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApprovedBalanceRequest {
    pub request: BalanceRequest,
    pub user: UserBalance,
}
