use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    referrals::{CreditedReferral, Referral},
    transactions::NewTransaction,
    users::User,
};
use crate::repositories::{LedgerStore, LedgerTx};

pub enum ReferralRequest {
    ListReferrals {
        referrer_id: i64,
        response: oneshot::Sender<Result<Vec<Referral>, ServiceError>>,
    },
    CreditReferral {
        referral_id: i64,
        response: oneshot::Sender<Result<CreditedReferral, ServiceError>>,
    },
}

/// Pays the referral reward inside an open unit: flips `credited`, credits the
/// referrer and records the matching transaction. Fails with `InvalidState`
/// when the referral was already paid.
pub(crate) async fn credit_referral(
    tx: &mut dyn LedgerTx,
    referral_id: i64,
    reward: i64,
) -> Result<(Referral, User), ServiceError> {
    let referral = match tx.mark_referral_credited(referral_id).await? {
        Some(referral) => referral,
        None => {
            return Err(match tx.get_referral(referral_id).await? {
                Some(_) => {
                    ServiceError::InvalidState("Referral has already been credited".to_string())
                }
                None => ServiceError::NotFound("Referral".to_string()),
            })
        }
    };

    let referrer = if reward > 0 {
        let referrer = tx
            .adjust_balance(referral.referrer_id, reward)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        tx.append_transaction(NewTransaction::credit(
            referral.referrer_id,
            reward,
            format!("Referral bonus for referral #{}", referral.id),
        ))
        .await?;
        referrer
    } else {
        tx.get_user(referral.referrer_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?
    };

    log::info!(
        "Referral #{} credited: user #{} received {} paise.",
        referral.id,
        referrer.id,
        reward
    );

    Ok((referral, referrer))
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    store: Arc<dyn LedgerStore>,
    reward: i64,
}

impl ReferralRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, reward: i64) -> Self {
        ReferralRequestHandler { store, reward }
    }

    pub async fn list_referrals(&self, referrer_id: i64) -> Result<Vec<Referral>, ServiceError> {
        Ok(self.store.list_referrals(referrer_id).await?)
    }

    pub async fn credit(&self, referral_id: i64) -> Result<CreditedReferral, ServiceError> {
        let mut tx = self.store.begin().await?;
        let (referral, referrer) = credit_referral(tx.as_mut(), referral_id, self.reward).await?;
        tx.commit().await?;

        Ok(CreditedReferral {
            referral,
            user: (&referrer).into(),
        })
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::ListReferrals {
                referrer_id,
                response,
            } => {
                let referrals = self.list_referrals(referrer_id).await;
                let _ = response.send(referrals);
            }
            ReferralRequest::CreditReferral {
                referral_id,
                response,
            } => {
                let result = self.credit(referral_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
