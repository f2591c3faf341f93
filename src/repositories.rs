use async_trait::async_trait;

use crate::models::{
    balance_requests::{BalanceRequest, BalanceRequestStatus, NewBalanceRequest},
    otp::{NewOtpHistory, OtpHistory},
    referrals::{NewReferral, Referral},
    sessions::Session,
    transactions::{NewTransaction, Transaction},
    users::{NewUser, User},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Username already exists")]
    DuplicateUsername,
    #[error("Referral code already exists")]
    DuplicateReferralCode,
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: i64, requested: i64 },
    #[error("Balance would exceed the supported maximum")]
    BalanceOverflow,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Single source of truth for every ledger entity.
///
/// Plain reads and single-row writes live here. Anything that touches a
/// balance goes through a [`LedgerTx`] opened with [`LedgerStore::begin`], so a
/// balance change and its transaction record land together or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError>;

    /// Newest first.
    async fn list_transactions(&self, user_id: i64) -> Result<Vec<Transaction>, StoreError>;

    /// Newest first.
    async fn list_otp_history(&self, user_id: i64) -> Result<Vec<OtpHistory>, StoreError>;
    async fn clear_otp_history(&self, user_id: i64) -> Result<u64, StoreError>;

    /// Referrals where `referrer_id` is the referrer, newest first.
    async fn list_referrals(&self, referrer_id: i64) -> Result<Vec<Referral>, StoreError>;
    async fn get_referral(&self, id: i64) -> Result<Option<Referral>, StoreError>;

    /// Always stored as `pending` with no approver, whatever the caller holds.
    async fn create_balance_request(
        &self,
        request: NewBalanceRequest,
    ) -> Result<BalanceRequest, StoreError>;
    async fn get_balance_request(&self, id: i64) -> Result<Option<BalanceRequest>, StoreError>;
    async fn list_balance_requests(&self, user_id: i64) -> Result<Vec<BalanceRequest>, StoreError>;
    async fn list_all_balance_requests(
        &self,
        status: Option<BalanceRequestStatus>,
    ) -> Result<Vec<BalanceRequest>, StoreError>;

    async fn create_session(&self, session: Session) -> Result<Session, StoreError>;
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError>;
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;
    /// Removes every session whose `expires_at` is at or before `now`.
    async fn purge_expired_sessions(&self, now: chrono::NaiveDateTime) -> Result<u64, StoreError>;
}

/// One atomic unit of ledger writes. Dropping it without calling
/// [`LedgerTx::commit`] discards every write made through it.
#[async_trait]
pub trait LedgerTx: Send {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError>;

    /// Balance always starts at zero.
    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    /// Applies `delta` to the user's balance. `None` when the user does not
    /// exist; `InsufficientBalance` when the result would drop below zero;
    /// `BalanceOverflow` when it would not fit in an `i64`.
    async fn adjust_balance(&mut self, user_id: i64, delta: i64)
        -> Result<Option<User>, StoreError>;

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError>;
    async fn append_otp_history(&mut self, entry: NewOtpHistory)
        -> Result<OtpHistory, StoreError>;

    async fn create_referral(&mut self, referral: NewReferral) -> Result<Referral, StoreError>;
    async fn get_referral(&mut self, id: i64) -> Result<Option<Referral>, StoreError>;
    async fn get_referral_by_referred(
        &mut self,
        referred_id: i64,
    ) -> Result<Option<Referral>, StoreError>;

    /// Flips `credited` on an uncredited referral. `None` when the referral is
    /// missing or was already credited.
    async fn mark_referral_credited(&mut self, id: i64) -> Result<Option<Referral>, StoreError>;

    async fn get_balance_request(&mut self, id: i64) -> Result<Option<BalanceRequest>, StoreError>;

    /// Moves a `pending` request to `status`, stamping the approver and, for a
    /// terminal status, `approved_at`. `None` when the request is missing or
    /// no longer pending.
    async fn set_balance_request_status(
        &mut self,
        id: i64,
        status: BalanceRequestStatus,
        admin_id: i64,
    ) -> Result<Option<BalanceRequest>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
