use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{referrals, RequestHandler, Service, ServiceError};
use crate::models::{
    referrals::{NewReferral, ReferralPolicy},
    sessions::Session,
    users::{Credentials, NewUser, Registration, User},
};
use crate::repositories::LedgerStore;
use crate::settings;
use crate::utils;

const REFERRAL_CODE_ATTEMPTS: usize = 8;

pub enum AuthRequest {
    Register {
        registration: Registration,
        response: oneshot::Sender<Result<(User, Session), ServiceError>>,
    },
    Login {
        credentials: Credentials,
        response: oneshot::Sender<Result<(User, Session), ServiceError>>,
    },
    Logout {
        token: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ResolveSession {
        token: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct AuthRequestHandler {
    store: Arc<dyn LedgerStore>,
    session_ttl: chrono::Duration,
    referral: settings::Referral,
}

impl AuthRequestHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        session_ttl: chrono::Duration,
        referral: settings::Referral,
    ) -> Self {
        AuthRequestHandler {
            store,
            session_ttl,
            referral,
        }
    }

    pub async fn register(&self, registration: Registration) -> Result<(User, Session), ServiceError> {
        let username = required(registration.username)
            .ok_or_else(|| ServiceError::Validation("Username is required".to_string()))?;
        let password = registration
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::Validation("Password is required".to_string()))?;

        if self.store.get_user_by_username(&username).await?.is_some() {
            return Err(ServiceError::Conflict("Username already exists".to_string()));
        }

        let referrer = self.resolve_referrer(registration.referred_by).await?;
        let user = self
            .create_account(username, &password, registration.referral_code, referrer, false)
            .await?;
        let session = self.open_session(&user).await?;

        Ok((user, session))
    }

    pub async fn login(&self, credentials: Credentials) -> Result<(User, Session), ServiceError> {
        let (Some(username), Some(password)) = (
            required(credentials.username),
            credentials.password.filter(|p| !p.is_empty()),
        ) else {
            return Err(ServiceError::Validation(
                "Username and password are required".to_string(),
            ));
        };

        let user = match self.store.get_user_by_username(&username).await? {
            Some(user) if utils::verify_password(&password, &user.password_hash) => user,
            _ => {
                log::warn!("Rejected login for username: {}", username);
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let session = self.open_session(&user).await?;
        log::info!("User #{} logged in.", user.id);

        Ok((user, session))
    }

    pub async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        Ok(self.store.delete_session(token).await?)
    }

    /// Maps a session token to its user. Unknown or expired tokens fail with
    /// `AuthenticationRequired`; expired ones are removed on the way out.
    pub async fn resolve_session(&self, token: &str) -> Result<User, ServiceError> {
        let session = self
            .store
            .get_session(token)
            .await?
            .ok_or(ServiceError::AuthenticationRequired)?;

        if session.is_expired(now()) {
            self.store.delete_session(token).await?;
            return Err(ServiceError::AuthenticationRequired);
        }

        self.store
            .get_user(session.user_id)
            .await?
            .ok_or(ServiceError::AuthenticationRequired)
    }

    /// Creates the configured admin account when it does not exist yet.
    pub async fn ensure_admin(&self, admin: &settings::Admin) -> Result<Option<User>, ServiceError> {
        let username = admin.username.trim();
        if username.is_empty() || admin.password.is_empty() {
            log::warn!("No admin account configured.");
            return Ok(None);
        }

        if let Some(user) = self.store.get_user_by_username(username).await? {
            if !user.is_admin {
                log::warn!(
                    "Configured admin username {} belongs to a regular user.",
                    username
                );
            }
            return Ok(Some(user));
        }

        let user = self
            .create_account(username.to_string(), &admin.password, None, None, true)
            .await?;
        log::info!("Created admin account #{}.", user.id);

        Ok(Some(user))
    }

    async fn resolve_referrer(&self, referred_by: Option<String>) -> Result<Option<User>, ServiceError> {
        let Some(reference) = required(referred_by) else {
            return Ok(None);
        };

        if let Some(user) = self.store.get_user_by_username(&reference).await? {
            return Ok(Some(user));
        }
        if let Some(user) = self.store.get_user_by_referral_code(&reference).await? {
            return Ok(Some(user));
        }

        log::warn!("Ignoring unknown referrer: {}", reference);
        Ok(None)
    }

    async fn pick_referral_code(
        &self,
        username: &str,
        requested: Option<String>,
    ) -> Result<String, ServiceError> {
        if let Some(code) = required(requested).filter(|c| utils::is_valid_referral_code(c)) {
            if self.store.get_user_by_referral_code(&code).await?.is_none() {
                return Ok(code);
            }
        }

        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let code = utils::generate_referral_code(username);
            if self.store.get_user_by_referral_code(&code).await?.is_none() {
                return Ok(code);
            }
        }

        Err(ServiceError::Internal(
            "Could not allocate a referral code".to_string(),
        ))
    }

    /// Inserts the user and, when referred, the referral edge in one unit.
    async fn create_account(
        &self,
        username: String,
        password: &str,
        requested_code: Option<String>,
        referrer: Option<User>,
        is_admin: bool,
    ) -> Result<User, ServiceError> {
        let referral_code = self.pick_referral_code(&username, requested_code).await?;
        let password_hash = utils::hash_password(password)
            .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))?;

        let mut tx = self.store.begin().await?;
        let user = tx
            .create_user(NewUser {
                username,
                password_hash,
                referral_code,
                referred_by: referrer.as_ref().map(|r| r.username.clone()),
                is_admin,
            })
            .await?;

        if let Some(referrer) = referrer {
            let referral = tx
                .create_referral(NewReferral {
                    referrer_id: referrer.id,
                    referred_id: user.id,
                })
                .await?;
            log::info!(
                "Referral #{}: user #{} referred user #{}.",
                referral.id,
                referrer.id,
                user.id
            );

            if self.referral.policy == ReferralPolicy::OnRegistration {
                referrals::credit_referral(tx.as_mut(), referral.id, self.referral.reward_paise())
                    .await?;
            }
        }

        tx.commit().await?;
        log::info!("Registered user #{} ({}).", user.id, user.username);

        Ok(user)
    }

    /// Expired sessions that were never presented again are swept here.
    async fn open_session(&self, user: &User) -> Result<Session, ServiceError> {
        let created_at = now();
        let purged = self.store.purge_expired_sessions(created_at).await?;
        if purged > 0 {
            log::debug!("Purged {} expired sessions.", purged);
        }

        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user.id,
            created_at,
            expires_at: created_at + self.session_ttl,
        };

        Ok(self.store.create_session(session).await?)
    }
}

#[async_trait]
impl RequestHandler<AuthRequest> for AuthRequestHandler {
    async fn handle_request(&self, request: AuthRequest) {
        match request {
            AuthRequest::Register {
                registration,
                response,
            } => {
                let result = self.register(registration).await;
                let _ = response.send(result);
            }
            AuthRequest::Login {
                credentials,
                response,
            } => {
                let result = self.login(credentials).await;
                let _ = response.send(result);
            }
            AuthRequest::Logout { token, response } => {
                let result = self.logout(&token).await;
                let _ = response.send(result);
            }
            AuthRequest::ResolveSession { token, response } => {
                let user = self.resolve_session(&token).await;
                let _ = response.send(user);
            }
        }
    }
}

pub struct AuthService;

impl AuthService {
    pub fn new() -> Self {
        AuthService {}
    }
}

#[async_trait]
impl Service<AuthRequest, AuthRequestHandler> for AuthService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;

    fn handler_with(store: &MemoryStore, referral: settings::Referral) -> AuthRequestHandler {
        AuthRequestHandler::new(Arc::new(store.clone()), chrono::Duration::hours(720), referral)
    }

    fn registration(username: &str, referred_by: Option<&str>) -> Registration {
        Registration {
            username: Some(username.to_string()),
            password: Some("secret".to_string()),
            referral_code: None,
            referred_by: referred_by.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn register_creates_user_and_session() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());

        let (user, session) = auth.register(registration("ravi", None)).await.unwrap();
        assert_eq!(user.balance, 0);
        assert!(!user.is_admin);
        assert!(user.referral_code.starts_with("RAVI"));
        assert_ne!(user.password_hash, "secret");

        let resolved = auth.resolve_session(&session.token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());

        auth.register(registration("ravi", None)).await.unwrap();
        let err = auth.register(registration("ravi", None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_requires_username_and_password() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());

        let mut missing_password = registration("ravi", None);
        missing_password.password = None;
        assert!(matches!(
            auth.register(missing_password).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
        assert!(matches!(
            auth.register(registration("  ", None)).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn requested_referral_code_is_kept_when_free() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());

        let mut first = registration("ravi", None);
        first.referral_code = Some("RAVI2025".to_string());
        let (user, _) = auth.register(first).await.unwrap();
        assert_eq!(user.referral_code, "RAVI2025");

        let mut second = registration("ravina", None);
        second.referral_code = Some("RAVI2025".to_string());
        let (other, _) = auth.register(second).await.unwrap();
        assert_ne!(other.referral_code, "RAVI2025");
    }

    #[tokio::test]
    async fn referral_recorded_by_username_or_code() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());

        let (referrer, _) = auth.register(registration("priya", None)).await.unwrap();
        let (by_name, _) = auth
            .register(registration("arjun", Some("priya")))
            .await
            .unwrap();
        let (by_code, _) = auth
            .register(registration("meera", Some(&referrer.referral_code)))
            .await
            .unwrap();
        let (unknown, _) = auth
            .register(registration("kabir", Some("nobody")))
            .await
            .unwrap();

        assert_eq!(by_name.referred_by.as_deref(), Some("priya"));
        assert_eq!(by_code.referred_by.as_deref(), Some("priya"));
        assert!(unknown.referred_by.is_none());

        let referrals = store.list_referrals(referrer.id).await.unwrap();
        assert_eq!(referrals.len(), 2);
        assert!(referrals.iter().all(|r| !r.credited));
        assert_eq!(store.get_user(referrer.id).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn on_registration_policy_pays_referrer() {
        let store = MemoryStore::new();
        let auth = handler_with(
            &store,
            settings::Referral {
                policy: ReferralPolicy::OnRegistration,
                reward: 10.0,
            },
        );

        let (referrer, _) = auth.register(registration("priya", None)).await.unwrap();
        auth.register(registration("arjun", Some("priya")))
            .await
            .unwrap();

        assert_eq!(store.get_user(referrer.id).await.unwrap().unwrap().balance, 1_000);
        assert!(store.list_referrals(referrer.id).await.unwrap()[0].credited);
        assert_eq!(store.list_transactions(referrer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn login_checks_password() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());
        auth.register(registration("ravi", None)).await.unwrap();

        let (user, _) = auth
            .login(Credentials {
                username: Some("ravi".to_string()),
                password: Some("secret".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(user.username, "ravi");

        let err = auth
            .login(Credentials {
                username: Some("ravi".to_string()),
                password: Some("wrong".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));

        let err = auth
            .login(Credentials {
                username: None,
                password: Some("secret".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn logout_and_expiry_end_sessions() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());
        let (_, session) = auth.register(registration("ravi", None)).await.unwrap();

        auth.logout(&session.token).await.unwrap();
        assert!(matches!(
            auth.resolve_session(&session.token).await.unwrap_err(),
            ServiceError::AuthenticationRequired
        ));

        let expired = AuthRequestHandler::new(
            Arc::new(store.clone()),
            chrono::Duration::zero(),
            settings::Referral::default(),
        );
        let (_, session) = expired
            .login(Credentials {
                username: Some("ravi".to_string()),
                password: Some("secret".to_string()),
            })
            .await
            .unwrap();
        assert!(matches!(
            expired.resolve_session(&session.token).await.unwrap_err(),
            ServiceError::AuthenticationRequired
        ));
        assert!(store.get_session(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_sessions_sweep_abandoned_expired_ones() {
        let store = MemoryStore::new();
        let short_lived = AuthRequestHandler::new(
            Arc::new(store.clone()),
            chrono::Duration::zero(),
            settings::Referral::default(),
        );
        let (_, abandoned) = short_lived
            .register(registration("ravi", None))
            .await
            .unwrap();
        assert!(store.get_session(&abandoned.token).await.unwrap().is_some());

        let auth = handler_with(&store, settings::Referral::default());
        let (_, live) = auth
            .login(Credentials {
                username: Some("ravi".to_string()),
                password: Some("secret".to_string()),
            })
            .await
            .unwrap();

        assert!(store.get_session(&abandoned.token).await.unwrap().is_none());
        assert!(store.get_session(&live.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let store = MemoryStore::new();
        let auth = handler_with(&store, settings::Referral::default());
        let admin = settings::Admin {
            username: "root".to_string(),
            password: "toor".to_string(),
        };

        let created = auth.ensure_admin(&admin).await.unwrap().unwrap();
        assert!(created.is_admin);
        let again = auth.ensure_admin(&admin).await.unwrap().unwrap();
        assert_eq!(created.id, again.id);

        assert!(auth
            .ensure_admin(&settings::Admin::default())
            .await
            .unwrap()
            .is_none());
    }
}
