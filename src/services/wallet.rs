use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{referrals, RequestHandler, Service, ServiceError};
use crate::models::{
    balance_requests::{
        ApprovedBalanceRequest, BalanceRequest, BalanceRequestStatus, NewBalanceRequest,
    },
    money,
    referrals::ReferralPolicy,
    transactions::{NewTransaction, Transaction},
};
use crate::repositories::LedgerStore;
use crate::settings;

/// Largest single top-up a user may claim, in paise (₹1 crore).
pub const MAX_BALANCE_REQUEST: i64 = 10_000_000 * money::PAISE_PER_RUPEE;

pub enum WalletRequest {
    ListTransactions {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
    SubmitBalanceRequest {
        user_id: i64,
        amount: i64,
        utr_number: String,
        response: oneshot::Sender<Result<BalanceRequest, ServiceError>>,
    },
    ListBalanceRequests {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<BalanceRequest>, ServiceError>>,
    },
    ListAllBalanceRequests {
        status: Option<BalanceRequestStatus>,
        response: oneshot::Sender<Result<Vec<BalanceRequest>, ServiceError>>,
    },
    ApproveBalanceRequest {
        request_id: i64,
        admin_id: i64,
        response: oneshot::Sender<Result<ApprovedBalanceRequest, ServiceError>>,
    },
    RejectBalanceRequest {
        request_id: i64,
        admin_id: i64,
        response: oneshot::Sender<Result<BalanceRequest, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct WalletRequestHandler {
    store: Arc<dyn LedgerStore>,
    referral: settings::Referral,
}

impl WalletRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, referral: settings::Referral) -> Self {
        WalletRequestHandler { store, referral }
    }

    pub async fn list_transactions(&self, user_id: i64) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.store.list_transactions(user_id).await?)
    }

    /// Records the claim as `pending`. The balance is left alone until an
    /// admin approves it.
    pub async fn submit_balance_request(
        &self,
        user_id: i64,
        amount: i64,
        utr_number: String,
    ) -> Result<BalanceRequest, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation(
                "Valid amount is required".to_string(),
            ));
        }
        if amount > MAX_BALANCE_REQUEST {
            return Err(ServiceError::Validation(format!(
                "Amount must not exceed {}",
                money::to_rupees(MAX_BALANCE_REQUEST)
            )));
        }

        let utr_number = utr_number.trim().to_string();
        if utr_number.is_empty() {
            return Err(ServiceError::Validation(
                "Valid UTR number is required".to_string(),
            ));
        }

        let request = self
            .store
            .create_balance_request(NewBalanceRequest {
                user_id,
                amount,
                utr_number,
            })
            .await?;
        log::info!(
            "Balance request #{} submitted by user #{} for {} paise.",
            request.id,
            user_id,
            amount
        );

        Ok(request)
    }

    pub async fn list_balance_requests(
        &self,
        user_id: i64,
    ) -> Result<Vec<BalanceRequest>, ServiceError> {
        Ok(self.store.list_balance_requests(user_id).await?)
    }

    pub async fn list_all_balance_requests(
        &self,
        status: Option<BalanceRequestStatus>,
    ) -> Result<Vec<BalanceRequest>, ServiceError> {
        Ok(self.store.list_all_balance_requests(status).await?)
    }

    /// Moves the request out of `pending`, credits the requester and records
    /// the credit, all in one unit. A request that is no longer pending fails
    /// with `InvalidState` and nothing is written.
    pub async fn approve_balance_request(
        &self,
        request_id: i64,
        admin_id: i64,
    ) -> Result<ApprovedBalanceRequest, ServiceError> {
        let mut tx = self.store.begin().await?;

        let request = match tx
            .set_balance_request_status(request_id, BalanceRequestStatus::Approved, admin_id)
            .await?
        {
            Some(request) => request,
            None => return Err(disposition_error(tx.get_balance_request(request_id).await?)),
        };

        let user = tx
            .adjust_balance(request.user_id, request.amount)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        tx.append_transaction(NewTransaction::credit(
            request.user_id,
            request.amount,
            format!("Balance request #{} approved", request.id),
        ))
        .await?;

        if self.referral.policy == ReferralPolicy::OnFirstTopUp {
            if let Some(referral) = tx.get_referral_by_referred(request.user_id).await? {
                if !referral.credited {
                    referrals::credit_referral(
                        tx.as_mut(),
                        referral.id,
                        self.referral.reward_paise(),
                    )
                    .await?;
                }
            }
        }

        tx.commit().await?;
        log::info!(
            "Balance request #{} approved by admin #{}: user #{} credited {} paise.",
            request.id,
            admin_id,
            user.id,
            request.amount
        );

        Ok(ApprovedBalanceRequest {
            request,
            user: (&user).into(),
        })
    }

    pub async fn reject_balance_request(
        &self,
        request_id: i64,
        admin_id: i64,
    ) -> Result<BalanceRequest, ServiceError> {
        let mut tx = self.store.begin().await?;

        let request = match tx
            .set_balance_request_status(request_id, BalanceRequestStatus::Rejected, admin_id)
            .await?
        {
            Some(request) => request,
            None => return Err(disposition_error(tx.get_balance_request(request_id).await?)),
        };

        tx.commit().await?;
        log::info!(
            "Balance request #{} rejected by admin #{}.",
            request.id,
            admin_id
        );

        Ok(request)
    }
}

fn disposition_error(existing: Option<BalanceRequest>) -> ServiceError {
    match existing {
        Some(request) => {
            log::warn!(
                "Balance request #{} already {}; disposition refused.",
                request.id,
                request.status
            );
            ServiceError::InvalidState("Balance request has already been processed".to_string())
        }
        None => ServiceError::NotFound("Balance request".to_string()),
    }
}

#[async_trait]
impl RequestHandler<WalletRequest> for WalletRequestHandler {
    async fn handle_request(&self, request: WalletRequest) {
        match request {
            WalletRequest::ListTransactions { user_id, response } => {
                let transactions = self.list_transactions(user_id).await;
                let _ = response.send(transactions);
            }
            WalletRequest::SubmitBalanceRequest {
                user_id,
                amount,
                utr_number,
                response,
            } => {
                let request = self
                    .submit_balance_request(user_id, amount, utr_number)
                    .await;
                let _ = response.send(request);
            }
            WalletRequest::ListBalanceRequests { user_id, response } => {
                let requests = self.list_balance_requests(user_id).await;
                let _ = response.send(requests);
            }
            WalletRequest::ListAllBalanceRequests { status, response } => {
                let requests = self.list_all_balance_requests(status).await;
                let _ = response.send(requests);
            }
            WalletRequest::ApproveBalanceRequest {
                request_id,
                admin_id,
                response,
            } => {
                let result = self.approve_balance_request(request_id, admin_id).await;
                let _ = response.send(result);
            }
            WalletRequest::RejectBalanceRequest {
                request_id,
                admin_id,
                response,
            } => {
                let result = self.reject_balance_request(request_id, admin_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct WalletService;

impl WalletService {
    pub fn new() -> Self {
        WalletService {}
    }
}

#[async_trait]
impl Service<WalletRequest, WalletRequestHandler> for WalletService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::referrals::NewReferral;
    use crate::models::transactions::TransactionKind;
    use crate::models::users::{NewUser, User};
    use crate::repositories::MemoryStore;

    async fn create_user(store: &MemoryStore, username: &str, is_admin: bool) -> User {
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: "h.s".to_string(),
                referral_code: username.to_uppercase(),
                referred_by: None,
                is_admin,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        user
    }

    fn handler(store: &MemoryStore) -> WalletRequestHandler {
        WalletRequestHandler::new(Arc::new(store.clone()), settings::Referral::default())
    }

    async fn assert_ledger_invariant(store: &MemoryStore, user_id: i64) {
        let balance = store.get_user(user_id).await.unwrap().unwrap().balance;
        let sum: i64 = store
            .list_transactions(user_id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.amount)
            .sum();
        assert_eq!(balance, sum, "balance must equal the sum of transactions");
    }

    #[tokio::test]
    async fn oversized_claims_are_refused() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let wallet = handler(&store);

        wallet
            .submit_balance_request(user.id, MAX_BALANCE_REQUEST, "UTR1".to_string())
            .await
            .unwrap();
        let err = wallet
            .submit_balance_request(user.id, MAX_BALANCE_REQUEST + 1, "UTR2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(wallet.list_balance_requests(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn approval_that_would_overflow_changes_nothing() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let mut tx = store.begin().await.unwrap();
        tx.adjust_balance(user.id, i64::MAX - 50).await.unwrap();
        tx.commit().await.unwrap();

        let request = wallet
            .submit_balance_request(user.id, 100, "UTR123".to_string())
            .await
            .unwrap();
        let err = wallet
            .approve_balance_request(request.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().balance,
            i64::MAX - 50
        );
        assert!(store.list_transactions(user.id).await.unwrap().is_empty());
        let request = store.get_balance_request(request.id).await.unwrap().unwrap();
        assert_eq!(request.status, BalanceRequestStatus::Pending);
    }

    #[tokio::test]
    async fn approval_credits_balance_and_records_transaction() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let request = wallet
            .submit_balance_request(user.id, 10_000, "UTR123".to_string())
            .await
            .unwrap();
        assert_eq!(request.status, BalanceRequestStatus::Pending);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().balance, 0);

        let approved = wallet
            .approve_balance_request(request.id, admin.id)
            .await
            .unwrap();
        assert_eq!(approved.request.status, BalanceRequestStatus::Approved);
        assert_eq!(approved.request.approved_by, Some(admin.id));
        assert!(approved.request.approved_at.is_some());
        assert_eq!(approved.user.balance, 10_000);

        let transactions = store.list_transactions(user.id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].amount, 10_000);
        assert_eq!(transactions[0].kind, TransactionKind::Add);
        assert!(transactions[0].note.contains(&format!("#{}", request.id)));
        assert_ledger_invariant(&store, user.id).await;
    }

    #[tokio::test]
    async fn submission_is_validated() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let wallet = handler(&store);

        let err = wallet
            .submit_balance_request(user.id, 0, "UTR1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = wallet
            .submit_balance_request(user.id, 100, "   ".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        assert!(store.list_balance_requests(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_disposition_fails_and_credits_once() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let request = wallet
            .submit_balance_request(user.id, 5_000, "UTR9".to_string())
            .await
            .unwrap();
        wallet
            .approve_balance_request(request.id, admin.id)
            .await
            .unwrap();

        let err = wallet
            .approve_balance_request(request.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        let err = wallet
            .reject_balance_request(request.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().balance, 5_000);
        assert_eq!(store.list_transactions(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejection_leaves_ledger_untouched() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let request = wallet
            .submit_balance_request(user.id, 5_000, "UTR9".to_string())
            .await
            .unwrap();
        let rejected = wallet
            .reject_balance_request(request.id, admin.id)
            .await
            .unwrap();
        assert_eq!(rejected.status, BalanceRequestStatus::Rejected);
        assert!(rejected.approved_at.is_some());
        assert_eq!(rejected.approved_by, Some(admin.id));

        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().balance, 0);
        assert!(store.list_transactions(user.id).await.unwrap().is_empty());

        let err = wallet
            .approve_balance_request(request.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let store = MemoryStore::new();
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let err = wallet.approve_balance_request(77, admin.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = wallet.reject_balance_request(77, admin.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_approvals_credit_exactly_once() {
        let store = MemoryStore::new();
        let user = create_user(&store, "ravi", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let request = wallet
            .submit_balance_request(user.id, 10_000, "UTR123".to_string())
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let wallet = wallet.clone();
            tokio::spawn(async move { wallet.approve_balance_request(request.id, admin.id).await })
        });
        let results = futures_util::future::join_all(attempts).await;

        let successes = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|result| result.is_ok())
            .count();
        assert_eq!(successes, 1);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().balance, 10_000);
        assert_eq!(store.list_transactions(user.id).await.unwrap().len(), 1);
        assert_ledger_invariant(&store, user.id).await;
    }

    #[tokio::test]
    async fn admin_listing_filters_by_status() {
        let store = MemoryStore::new();
        let first = create_user(&store, "one", false).await;
        let second = create_user(&store, "two", false).await;
        let admin = create_user(&store, "admin", true).await;
        let wallet = handler(&store);

        let a = wallet
            .submit_balance_request(first.id, 100, "A".to_string())
            .await
            .unwrap();
        wallet
            .submit_balance_request(second.id, 200, "B".to_string())
            .await
            .unwrap();
        wallet.reject_balance_request(a.id, admin.id).await.unwrap();

        assert_eq!(wallet.list_all_balance_requests(None).await.unwrap().len(), 2);
        let pending = wallet
            .list_all_balance_requests(Some(BalanceRequestStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, second.id);
        assert_eq!(wallet.list_balance_requests(first.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_top_up_pays_pending_referral() {
        let store = MemoryStore::new();
        let referrer = create_user(&store, "priya", false).await;
        let referred = create_user(&store, "arjun", false).await;
        let admin = create_user(&store, "admin", true).await;

        let mut tx = store.begin().await.unwrap();
        tx.create_referral(NewReferral {
            referrer_id: referrer.id,
            referred_id: referred.id,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let wallet = WalletRequestHandler::new(
            Arc::new(store.clone()),
            settings::Referral {
                policy: ReferralPolicy::OnFirstTopUp,
                reward: 10.0,
            },
        );

        for utr in ["UTR1", "UTR2"] {
            let request = wallet
                .submit_balance_request(referred.id, 5_000, utr.to_string())
                .await
                .unwrap();
            wallet
                .approve_balance_request(request.id, admin.id)
                .await
                .unwrap();
        }

        assert_eq!(store.get_user(referrer.id).await.unwrap().unwrap().balance, 1_000);
        assert_eq!(store.get_user(referred.id).await.unwrap().unwrap().balance, 10_000);
        assert!(store.list_referrals(referrer.id).await.unwrap()[0].credited);
        assert_ledger_invariant(&store, referrer.id).await;
        assert_ledger_invariant(&store, referred.id).await;
    }
}
