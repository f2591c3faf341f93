use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use super::{dispatch, AppState};
use crate::models::users::User;
use crate::services::{auth::AuthRequest, ServiceError};
use crate::settings;

pub const SESSION_COOKIE: &str = "sid";

#[derive(Clone, Debug)]
pub(crate) struct CookieSettings {
    secure: bool,
    max_age_seconds: i64,
}

impl From<&settings::Server> for CookieSettings {
    fn from(server: &settings::Server) -> Self {
        CookieSettings {
            secure: server.secure_cookies,
            max_age_seconds: server
                .session_ttl()
                .map(|ttl| ttl.num_seconds())
                .unwrap_or(0),
        }
    }
}

impl CookieSettings {
    pub fn issue(&self, token: &str) -> Result<HeaderValue, ServiceError> {
        self.render(token, self.max_age_seconds)
    }

    pub fn clear(&self) -> Result<HeaderValue, ServiceError> {
        self.render("", 0)
    }

    fn render(&self, value: &str, max_age: i64) -> Result<HeaderValue, ServiceError> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }

        HeaderValue::from_str(&cookie).map_err(|e| ServiceError::Internal(e.to_string()))
    }
}

/// The user a request was authenticated as, with the session it came from.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = session_token(request.headers()).ok_or(ServiceError::AuthenticationRequired)?;

    let user = dispatch(&state.channels.auth, "Auth", |response| {
        AuthRequest::ResolveSession {
            token: token.clone(),
            response,
        }
    })
    .await?;

    request
        .extensions_mut()
        .insert(CurrentUser { user, token });

    Ok(next.run(request).await)
}

pub(crate) async fn require_admin(request: Request, next: Next) -> Result<Response, ServiceError> {
    let is_admin = request
        .extensions()
        .get::<CurrentUser>()
        .ok_or(ServiceError::AuthenticationRequired)?
        .user
        .is_admin;

    if !is_admin {
        return Err(ServiceError::AuthorizationDenied);
    }

    Ok(next.run(request).await)
}
