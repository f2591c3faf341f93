use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::{LedgerStore, StoreError};
use crate::settings::Settings;

pub mod auth;
pub mod http;
pub mod otp;
pub mod referrals;
pub mod wallet;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Admin access required")]
    AuthorizationDenied,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateUsername => ServiceError::Conflict(e.to_string()),
            StoreError::DuplicateReferralCode => ServiceError::Conflict(e.to_string()),
            StoreError::InsufficientBalance { .. } => ServiceError::InsufficientBalance,
            StoreError::BalanceOverflow => {
                ServiceError::Validation("Amount exceeds the maximum wallet balance".to_string())
            }
            StoreError::Database(e) => {
                log::error!("Storage failure: {}", e);
                ServiceError::Database(e.to_string())
            }
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders for every running service. Cheap to clone.
#[derive(Clone)]
pub struct ServiceChannels {
    pub auth: mpsc::Sender<auth::AuthRequest>,
    pub wallet: mpsc::Sender<wallet::WalletRequest>,
    pub otp: mpsc::Sender<otp::OtpRequest>,
    pub referrals: mpsc::Sender<referrals::ReferralRequest>,
}

pub async fn start_services(
    store: Arc<dyn LedgerStore>,
    settings: &Settings,
) -> Result<ServiceChannels, anyhow::Error> {
    let (auth_tx, mut auth_rx) = mpsc::channel(512);
    let (wallet_tx, mut wallet_rx) = mpsc::channel(512);
    let (otp_tx, mut otp_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);

    let mut auth_service = auth::AuthService::new();
    let mut wallet_service = wallet::WalletService::new();
    let mut otp_service = otp::OtpService::new();
    let mut referral_service = referrals::ReferralService::new();

    log::info!("Starting auth service.");
    let auth_handler = auth::AuthRequestHandler::new(
        store.clone(),
        settings.server.session_ttl()?,
        settings.referral.clone(),
    );
    if let Some(admin) = auth_handler.ensure_admin(&settings.admin).await? {
        log::info!("Admin account ready: {} (#{}).", admin.username, admin.id);
    }
    tokio::spawn(async move {
        auth_service.run(auth_handler, &mut auth_rx).await;
    });

    log::info!("Starting wallet service.");
    let wallet_handler = wallet::WalletRequestHandler::new(store.clone(), settings.referral.clone());
    tokio::spawn(async move {
        wallet_service.run(wallet_handler, &mut wallet_rx).await;
    });

    log::info!("Starting OTP service.");
    let otp_handler = otp::OtpRequestHandler::new(store.clone(), settings.otp.default_price_paise());
    tokio::spawn(async move {
        otp_service.run(otp_handler, &mut otp_rx).await;
    });

    log::info!("Starting referral service.");
    let referral_handler =
        referrals::ReferralRequestHandler::new(store.clone(), settings.referral.reward_paise());
    tokio::spawn(async move {
        referral_service.run(referral_handler, &mut referral_rx).await;
    });

    log::info!("Started services.");
    Ok(ServiceChannels {
        auth: auth_tx,
        wallet: wallet_tx,
        otp: otp_tx,
        referrals: referral_tx,
    })
}
