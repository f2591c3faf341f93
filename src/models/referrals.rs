use serde::{Deserialize, Serialize};

use super::users::UserBalance;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub timestamp: chrono::NaiveDateTime,
    pub credited: bool,
}

#[derive(Clone, Debug)]
pub struct NewReferral {
    pub referrer_id: i64,
    pub referred_id: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralPolicy {
    #[default]
    Manual,
    OnRegistration,
    OnFirstTopUp,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreditedReferral {
    pub referral: Referral,
    pub user: UserBalance,
}
