use serde::{Deserialize, Serialize};

use super::money;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OtpHistory {
    pub id: i64,
    pub user_id: i64,
    pub otp: String,
    pub service_id: Option<String>,
    pub service_name: Option<String>,
    pub timestamp: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewOtpHistory {
    pub user_id: i64,
    pub otp: String,
    pub service_id: Option<String>,
    pub service_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpOrder {
    pub service_id: Option<String>,
    pub service_name: Option<String>,
    pub price: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IssuedOtp {
    pub otp: String,
    #[serde(with = "money::rupees")]
    pub cost: i64,
    pub service: String,
    #[serde(with = "money::rupees")]
    pub balance: i64,
}
