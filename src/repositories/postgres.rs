use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgConnection, PgPool};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::models::{
    balance_requests::{BalanceRequest, BalanceRequestStatus, NewBalanceRequest},
    otp::{NewOtpHistory, OtpHistory},
    referrals::{NewReferral, Referral},
    sessions::Session,
    transactions::{NewTransaction, Transaction},
    users::{NewUser, User},
};
use crate::settings;

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn decode_error(e: String) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(e.into()))
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &e {
        if db_error.is_unique_violation() {
            match db_error.constraint() {
                Some("users_username_key") => return StoreError::DuplicateUsername,
                Some("users_referral_code_key") => return StoreError::DuplicateReferralCode,
                _ => {}
            }
        }
    }

    StoreError::Database(e)
}

/// `numeric_value_out_of_range`, raised when `balance + delta` leaves BIGINT.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn map_balance_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &e {
        if db_error.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE) {
            return StoreError::BalanceOverflow;
        }
    }

    StoreError::Database(e)
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    user_id: i64,
    amount: i64,
    kind: String,
    note: String,
    timestamp: chrono::NaiveDateTime,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind: row.kind.parse().map_err(decode_error)?,
            note: row.note,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BalanceRequestRow {
    id: i64,
    user_id: i64,
    amount: i64,
    utr_number: String,
    status: String,
    timestamp: chrono::NaiveDateTime,
    approved_by: Option<i64>,
    approved_at: Option<chrono::NaiveDateTime>,
}

impl TryFrom<BalanceRequestRow> for BalanceRequest {
    type Error = StoreError;

    fn try_from(row: BalanceRequestRow) -> Result<Self, Self::Error> {
        Ok(BalanceRequest {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            utr_number: row.utr_number,
            status: row.status.parse().map_err(decode_error)?,
            timestamp: row.timestamp,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
        })
    }
}

fn convert_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

async fn fetch_user(
    executor: &mut PgConnection,
    id: i64,
) -> Result<Option<User>, StoreError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(user)
}

async fn fetch_referral(
    executor: &mut PgConnection,
    id: i64,
) -> Result<Option<Referral>, StoreError> {
    let referral = sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(referral)
}

async fn fetch_balance_request(
    executor: &mut PgConnection,
    id: i64,
) -> Result<Option<BalanceRequest>, StoreError> {
    let row = sqlx::query_as::<_, BalanceRequestRow>("SELECT * FROM balance_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(BalanceRequest::try_from).transpose()
}

#[derive(Clone)]
pub struct PostgresStore {
    conn: PgPool,
}

impl PostgresStore {
    pub fn new(conn: PgPool) -> Self {
        PostgresStore { conn }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(settings: &settings::Postgres) -> Result<Self, anyhow::Error> {
        let conn = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await?;

        sqlx::migrate!("./migrations").run(&conn).await?;
        log::info!("Database migrations applied.");

        Ok(Self::new(conn))
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let tx = self.conn.begin().await?;

        Ok(Box::new(PostgresTx { tx }))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn list_transactions(&self, user_id: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE user_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        convert_rows(rows)
    }

    async fn list_otp_history(&self, user_id: i64) -> Result<Vec<OtpHistory>, StoreError> {
        let history = sqlx::query_as::<_, OtpHistory>(
            "SELECT * FROM otp_history WHERE user_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(history)
    }

    async fn clear_otp_history(&self, user_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM otp_history WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_referrals(&self, referrer_id: i64) -> Result<Vec<Referral>, StoreError> {
        let referrals = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(referrals)
    }

    async fn get_referral(&self, id: i64) -> Result<Option<Referral>, StoreError> {
        let mut conn = self.conn.acquire().await?;
        fetch_referral(&mut conn, id).await
    }

    async fn create_balance_request(
        &self,
        request: NewBalanceRequest,
    ) -> Result<BalanceRequest, StoreError> {
        let row = sqlx::query_as::<_, BalanceRequestRow>(
            r#"
                INSERT INTO balance_requests (user_id, amount, utr_number, status, timestamp)
                VALUES ($1, $2, $3, 'pending', $4)
                RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .bind(&request.utr_number)
        .bind(now())
        .fetch_one(&self.conn)
        .await?;

        row.try_into()
    }

    async fn get_balance_request(&self, id: i64) -> Result<Option<BalanceRequest>, StoreError> {
        let mut conn = self.conn.acquire().await?;
        fetch_balance_request(&mut conn, id).await
    }

    async fn list_balance_requests(&self, user_id: i64) -> Result<Vec<BalanceRequest>, StoreError> {
        let rows = sqlx::query_as::<_, BalanceRequestRow>(
            "SELECT * FROM balance_requests WHERE user_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        convert_rows(rows)
    }

    async fn list_all_balance_requests(
        &self,
        status: Option<BalanceRequestStatus>,
    ) -> Result<Vec<BalanceRequest>, StoreError> {
        let rows = sqlx::query_as::<_, BalanceRequestRow>(
            r#"
                SELECT * FROM balance_requests
                WHERE $1::TEXT IS NULL OR status = $1
                ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.conn)
        .await?;

        convert_rows(rows)
    }

    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
                INSERT INTO sessions (token, user_id, created_at, expires_at)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .fetch_one(&self.conn)
        .await?;

        Ok(session)
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.conn)
            .await?;

        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn purge_expired_sessions(&self, now: chrono::NaiveDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}

/// A database transaction. sqlx rolls it back when dropped uncommitted.
pub struct PostgresTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTx {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl LedgerTx for PostgresTx {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        fetch_user(self.conn(), id).await
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
                INSERT INTO users (username, password_hash, balance, referral_code, referred_by, is_admin, created_at)
                VALUES ($1, $2, 0, $3, $4, $5, $6)
                RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.referral_code)
        .bind(&user.referred_by)
        .bind(user.is_admin)
        .bind(now())
        .fetch_one(self.conn())
        .await
        .map_err(map_insert_error)
    }

    async fn adjust_balance(
        &mut self,
        user_id: i64,
        delta: i64,
    ) -> Result<Option<User>, StoreError> {
        let updated = sqlx::query_as::<_, User>(
            r#"
                UPDATE users SET balance = balance + $2
                WHERE id = $1 AND balance + $2 >= 0
                RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(self.conn())
        .await
        .map_err(map_balance_error)?;

        if updated.is_some() {
            return Ok(updated);
        }

        match fetch_user(self.conn(), user_id).await? {
            Some(user) => Err(StoreError::InsufficientBalance {
                balance: user.balance,
                requested: -delta,
            }),
            None => Ok(None),
        }
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
                INSERT INTO transactions (user_id, amount, kind, note, timestamp)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            "#,
        )
        .bind(transaction.user_id)
        .bind(transaction.amount)
        .bind(transaction.kind.as_str())
        .bind(&transaction.note)
        .bind(now())
        .fetch_one(self.conn())
        .await?;

        row.try_into()
    }

    async fn append_otp_history(
        &mut self,
        entry: NewOtpHistory,
    ) -> Result<OtpHistory, StoreError> {
        let history = sqlx::query_as::<_, OtpHistory>(
            r#"
                INSERT INTO otp_history (user_id, otp, service_id, service_name, timestamp)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.otp)
        .bind(&entry.service_id)
        .bind(&entry.service_name)
        .bind(now())
        .fetch_one(self.conn())
        .await?;

        Ok(history)
    }

    async fn create_referral(&mut self, referral: NewReferral) -> Result<Referral, StoreError> {
        let referral = sqlx::query_as::<_, Referral>(
            r#"
                INSERT INTO referrals (referrer_id, referred_id, timestamp, credited)
                VALUES ($1, $2, $3, FALSE)
                RETURNING *
            "#,
        )
        .bind(referral.referrer_id)
        .bind(referral.referred_id)
        .bind(now())
        .fetch_one(self.conn())
        .await?;

        Ok(referral)
    }

    async fn get_referral(&mut self, id: i64) -> Result<Option<Referral>, StoreError> {
        fetch_referral(self.conn(), id).await
    }

    async fn get_referral_by_referred(
        &mut self,
        referred_id: i64,
    ) -> Result<Option<Referral>, StoreError> {
        let referral = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referred_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(referred_id)
        .fetch_optional(self.conn())
        .await?;

        Ok(referral)
    }

    async fn mark_referral_credited(&mut self, id: i64) -> Result<Option<Referral>, StoreError> {
        let referral = sqlx::query_as::<_, Referral>(
            "UPDATE referrals SET credited = TRUE WHERE id = $1 AND credited = FALSE RETURNING *",
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;

        Ok(referral)
    }

    async fn get_balance_request(&mut self, id: i64) -> Result<Option<BalanceRequest>, StoreError> {
        fetch_balance_request(self.conn(), id).await
    }

    async fn set_balance_request_status(
        &mut self,
        id: i64,
        status: BalanceRequestStatus,
        admin_id: i64,
    ) -> Result<Option<BalanceRequest>, StoreError> {
        let approved_at = status.is_terminal().then(now);
        let row = sqlx::query_as::<_, BalanceRequestRow>(
            r#"
                UPDATE balance_requests
                SET status = $2, approved_by = $3, approved_at = $4
                WHERE id = $1 AND status = 'pending'
                RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(admin_id)
        .bind(approved_at)
        .fetch_optional(self.conn())
        .await?;

        row.map(BalanceRequest::try_from).transpose()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
