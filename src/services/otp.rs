use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    otp::{IssuedOtp, NewOtpHistory, OtpHistory},
    transactions::NewTransaction,
};
use crate::repositories::LedgerStore;
use crate::utils;

const DEFAULT_SERVICE_NAME: &str = "Generic";

pub enum OtpRequest {
    Generate {
        user_id: i64,
        service_id: Option<String>,
        service_name: Option<String>,
        price: Option<i64>,
        response: oneshot::Sender<Result<IssuedOtp, ServiceError>>,
    },
    GetHistory {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<OtpHistory>, ServiceError>>,
    },
    ClearHistory {
        user_id: i64,
        response: oneshot::Sender<Result<u64, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct OtpRequestHandler {
    store: Arc<dyn LedgerStore>,
    default_price: i64,
}

impl OtpRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, default_price: i64) -> Self {
        OtpRequestHandler {
            store,
            default_price,
        }
    }

    /// Charges `price` (or the default when it is absent or not positive),
    /// then records the debit and the issued code together.
    pub async fn generate(
        &self,
        user_id: i64,
        service_id: Option<String>,
        service_name: Option<String>,
        price: Option<i64>,
    ) -> Result<IssuedOtp, ServiceError> {
        let cost = price
            .filter(|price| *price > 0)
            .unwrap_or(self.default_price);
        let service = service_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let mut tx = self.store.begin().await?;

        let user = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        if user.balance < cost {
            log::warn!(
                "OTP refused for user #{}: balance {} below cost {}.",
                user_id,
                user.balance,
                cost
            );
            return Err(ServiceError::InsufficientBalance);
        }

        let otp = utils::generate_otp();
        let user = tx
            .adjust_balance(user_id, -cost)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        tx.append_transaction(NewTransaction::debit(
            user_id,
            cost,
            format!("OTP Generated for {}", service),
        ))
        .await?;
        tx.append_otp_history(NewOtpHistory {
            user_id,
            otp: otp.clone(),
            service_id,
            service_name: Some(service.clone()),
        })
        .await?;
        tx.commit().await?;

        log::info!(
            "OTP issued to user #{} for {} at {} paise.",
            user_id,
            service,
            cost
        );

        Ok(IssuedOtp {
            otp,
            cost,
            service,
            balance: user.balance,
        })
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<OtpHistory>, ServiceError> {
        Ok(self.store.list_otp_history(user_id).await?)
    }

    pub async fn clear_history(&self, user_id: i64) -> Result<u64, ServiceError> {
        let removed = self.store.clear_otp_history(user_id).await?;
        log::info!("Cleared {} OTP history entries for user #{}.", removed, user_id);

        Ok(removed)
    }
}

#[async_trait]
impl RequestHandler<OtpRequest> for OtpRequestHandler {
    async fn handle_request(&self, request: OtpRequest) {
        match request {
            OtpRequest::Generate {
                user_id,
                service_id,
                service_name,
                price,
                response,
            } => {
                let issued = self
                    .generate(user_id, service_id, service_name, price)
                    .await;
                let _ = response.send(issued);
            }
            OtpRequest::GetHistory { user_id, response } => {
                let history = self.history(user_id).await;
                let _ = response.send(history);
            }
            OtpRequest::ClearHistory { user_id, response } => {
                let result = self.clear_history(user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct OtpService;

impl OtpService {
    pub fn new() -> Self {
        OtpService {}
    }
}

#[async_trait]
impl Service<OtpRequest, OtpRequestHandler> for OtpService {}
