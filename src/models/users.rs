use serde::{Deserialize, Serialize};

use super::money;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(with = "money::rupees")]
    pub balance: i64,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub is_admin: bool,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub is_admin: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: Option<String>,
    pub password: Option<String>,
    pub referral_code: Option<String>,
    pub referred_by: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Trimmed view of a user returned next to a disposed balance request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserBalance {
    pub id: i64,
    pub username: String,
    #[serde(with = "money::rupees")]
    pub balance: i64,
}

impl From<&User> for UserBalance {
    fn from(user: &User) -> Self {
        UserBalance {
            id: user.id,
            username: user.username.clone(),
            balance: user.balance,
        }
    }
}
