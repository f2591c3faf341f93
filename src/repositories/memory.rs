use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::models::{
    balance_requests::{BalanceRequest, BalanceRequestStatus, NewBalanceRequest},
    otp::{NewOtpHistory, OtpHistory},
    referrals::{NewReferral, Referral},
    sessions::Session,
    transactions::{NewTransaction, Transaction},
    users::{NewUser, User},
};

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    transactions: Vec<Transaction>,
    otp_history: Vec<OtpHistory>,
    referrals: BTreeMap<i64, Referral>,
    balance_requests: BTreeMap<i64, BalanceRequest>,
    sessions: HashMap<String, Session>,
    user_seq: i64,
    transaction_seq: i64,
    otp_seq: i64,
    referral_seq: i64,
    balance_request_seq: i64,
}

impl MemoryState {
    fn user_by(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|user| predicate(user)).cloned()
    }

    fn create_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        if self.user_by(|u| u.username == new_user.username).is_some() {
            return Err(StoreError::DuplicateUsername);
        }
        if self
            .user_by(|u| u.referral_code == new_user.referral_code)
            .is_some()
        {
            return Err(StoreError::DuplicateReferralCode);
        }

        self.user_seq += 1;
        let user = User {
            id: self.user_seq,
            username: new_user.username,
            password_hash: new_user.password_hash,
            balance: 0,
            referral_code: new_user.referral_code,
            referred_by: new_user.referred_by,
            is_admin: new_user.is_admin,
            created_at: now(),
        };
        self.users.insert(user.id, user.clone());

        Ok(user)
    }

    fn adjust_balance(&mut self, user_id: i64, delta: i64) -> Result<Option<User>, StoreError> {
        let Some(user) = self.users.get_mut(&user_id) else {
            return Ok(None);
        };

        let balance = user
            .balance
            .checked_add(delta)
            .ok_or(StoreError::BalanceOverflow)?;
        if balance < 0 {
            return Err(StoreError::InsufficientBalance {
                balance: user.balance,
                requested: -delta,
            });
        }
        user.balance = balance;

        Ok(Some(user.clone()))
    }

    fn append_transaction(&mut self, new_transaction: NewTransaction) -> Transaction {
        self.transaction_seq += 1;
        let transaction = Transaction {
            id: self.transaction_seq,
            user_id: new_transaction.user_id,
            amount: new_transaction.amount,
            kind: new_transaction.kind,
            note: new_transaction.note,
            timestamp: now(),
        };
        self.transactions.push(transaction.clone());

        transaction
    }

    fn append_otp_history(&mut self, entry: NewOtpHistory) -> OtpHistory {
        self.otp_seq += 1;
        let history = OtpHistory {
            id: self.otp_seq,
            user_id: entry.user_id,
            otp: entry.otp,
            service_id: entry.service_id,
            service_name: entry.service_name,
            timestamp: now(),
        };
        self.otp_history.push(history.clone());

        history
    }

    fn create_referral(&mut self, new_referral: NewReferral) -> Referral {
        self.referral_seq += 1;
        let referral = Referral {
            id: self.referral_seq,
            referrer_id: new_referral.referrer_id,
            referred_id: new_referral.referred_id,
            timestamp: now(),
            credited: false,
        };
        self.referrals.insert(referral.id, referral.clone());

        referral
    }

    fn mark_referral_credited(&mut self, id: i64) -> Option<Referral> {
        match self.referrals.get_mut(&id) {
            Some(referral) if !referral.credited => {
                referral.credited = true;
                Some(referral.clone())
            }
            _ => None,
        }
    }

    fn create_balance_request(&mut self, new_request: NewBalanceRequest) -> BalanceRequest {
        self.balance_request_seq += 1;
        let request = BalanceRequest {
            id: self.balance_request_seq,
            user_id: new_request.user_id,
            amount: new_request.amount,
            utr_number: new_request.utr_number,
            status: BalanceRequestStatus::Pending,
            timestamp: now(),
            approved_by: None,
            approved_at: None,
        };
        self.balance_requests.insert(request.id, request.clone());

        request
    }

    fn set_balance_request_status(
        &mut self,
        id: i64,
        status: BalanceRequestStatus,
        admin_id: i64,
    ) -> Option<BalanceRequest> {
        match self.balance_requests.get_mut(&id) {
            Some(request) if request.status == BalanceRequestStatus::Pending => {
                request.status = status;
                request.approved_by = Some(admin_id);
                request.approved_at = status.is_terminal().then(now);
                Some(request.clone())
            }
            _ => None,
        }
    }
}

/// The prior value of one row touched inside a [`MemoryTx`].
enum Undo {
    User(i64, Option<User>),
    Transaction,
    OtpHistory,
    Referral(i64, Option<Referral>),
    BalanceRequest(BalanceRequest),
}

impl MemoryState {
    fn revert(&mut self, step: Undo) {
        match step {
            Undo::User(id, Some(user)) => {
                self.users.insert(id, user);
            }
            Undo::User(id, None) => {
                self.users.remove(&id);
            }
            Undo::Transaction => {
                self.transactions.pop();
            }
            Undo::OtpHistory => {
                self.otp_history.pop();
            }
            Undo::Referral(id, Some(referral)) => {
                self.referrals.insert(id, referral);
            }
            Undo::Referral(id, None) => {
                self.referrals.remove(&id);
            }
            Undo::BalanceRequest(request) => {
                self.balance_requests.insert(request.id, request);
            }
        }
    }
}

fn newest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> (chrono::NaiveDateTime, i64)) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

/// Ledger store kept entirely in process memory. Every operation takes the
/// same lock, so a [`MemoryTx`] serializes against all other callers until it
/// commits or is dropped.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let state = self.state.clone().lock_owned().await;

        Ok(Box::new(MemoryTx {
            state,
            undo: Vec::new(),
        }))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.user_by(|u| u.username == username))
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.user_by(|u| u.referral_code == code))
    }

    async fn list_transactions(&self, user_id: i64) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();

        Ok(newest_first(rows, |t| (t.timestamp, t.id)))
    }

    async fn list_otp_history(&self, user_id: i64) -> Result<Vec<OtpHistory>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .otp_history
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();

        Ok(newest_first(rows, |h| (h.timestamp, h.id)))
    }

    async fn clear_otp_history(&self, user_id: i64) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.otp_history.len();
        state.otp_history.retain(|h| h.user_id != user_id);

        Ok((before - state.otp_history.len()) as u64)
    }

    async fn list_referrals(&self, referrer_id: i64) -> Result<Vec<Referral>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect();

        Ok(newest_first(rows, |r| (r.timestamp, r.id)))
    }

    async fn get_referral(&self, id: i64) -> Result<Option<Referral>, StoreError> {
        Ok(self.state.lock().await.referrals.get(&id).cloned())
    }

    async fn create_balance_request(
        &self,
        request: NewBalanceRequest,
    ) -> Result<BalanceRequest, StoreError> {
        Ok(self.state.lock().await.create_balance_request(request))
    }

    async fn get_balance_request(&self, id: i64) -> Result<Option<BalanceRequest>, StoreError> {
        Ok(self.state.lock().await.balance_requests.get(&id).cloned())
    }

    async fn list_balance_requests(&self, user_id: i64) -> Result<Vec<BalanceRequest>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .balance_requests
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();

        Ok(newest_first(rows, |r| (r.timestamp, r.id)))
    }

    async fn list_all_balance_requests(
        &self,
        status: Option<BalanceRequestStatus>,
    ) -> Result<Vec<BalanceRequest>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .balance_requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();

        Ok(newest_first(rows, |r| (r.timestamp, r.id)))
    }

    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.token.clone(), session.clone());

        Ok(session)
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.state.lock().await.sessions.remove(token);
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: chrono::NaiveDateTime) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, session| !session.is_expired(now));

        Ok((before - state.sessions.len()) as u64)
    }
}

/// Holds the store lock for its whole lifetime and writes straight into the
/// shared state. Each write records how to undo it; dropping the unit without
/// committing replays those records newest first.
pub struct MemoryTx {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        while let Some(step) = self.undo.pop() {
            self.state.revert(step);
        }
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state.users.get(&id).cloned())
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let user = self.state.create_user(user)?;
        self.undo.push(Undo::User(user.id, None));

        Ok(user)
    }

    async fn adjust_balance(
        &mut self,
        user_id: i64,
        delta: i64,
    ) -> Result<Option<User>, StoreError> {
        let previous = self.state.users.get(&user_id).cloned();
        let updated = self.state.adjust_balance(user_id, delta)?;
        if updated.is_some() {
            self.undo.push(Undo::User(user_id, previous));
        }

        Ok(updated)
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let transaction = self.state.append_transaction(transaction);
        self.undo.push(Undo::Transaction);

        Ok(transaction)
    }

    async fn append_otp_history(
        &mut self,
        entry: NewOtpHistory,
    ) -> Result<OtpHistory, StoreError> {
        let history = self.state.append_otp_history(entry);
        self.undo.push(Undo::OtpHistory);

        Ok(history)
    }

    async fn create_referral(&mut self, referral: NewReferral) -> Result<Referral, StoreError> {
        let referral = self.state.create_referral(referral);
        self.undo.push(Undo::Referral(referral.id, None));

        Ok(referral)
    }

    async fn get_referral(&mut self, id: i64) -> Result<Option<Referral>, StoreError> {
        Ok(self.state.referrals.get(&id).cloned())
    }

    async fn get_referral_by_referred(
        &mut self,
        referred_id: i64,
    ) -> Result<Option<Referral>, StoreError> {
        Ok(self
            .state
            .referrals
            .values()
            .find(|r| r.referred_id == referred_id)
            .cloned())
    }

    async fn mark_referral_credited(&mut self, id: i64) -> Result<Option<Referral>, StoreError> {
        let previous = self.state.referrals.get(&id).cloned();
        let credited = self.state.mark_referral_credited(id);
        if credited.is_some() {
            self.undo.push(Undo::Referral(id, previous));
        }

        Ok(credited)
    }

    async fn get_balance_request(&mut self, id: i64) -> Result<Option<BalanceRequest>, StoreError> {
        Ok(self.state.balance_requests.get(&id).cloned())
    }

    async fn set_balance_request_status(
        &mut self,
        id: i64,
        status: BalanceRequestStatus,
        admin_id: i64,
    ) -> Result<Option<BalanceRequest>, StoreError> {
        let previous = self.state.balance_requests.get(&id).cloned();
        let updated = self.state.set_balance_request_status(id, status, admin_id);
        if let (Some(_), Some(previous)) = (&updated, previous) {
            self.undo.push(Undo::BalanceRequest(previous));
        }

        Ok(updated)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.undo.clear();

        Ok(())
    }
}
