use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{ServiceChannels, ServiceError};
use crate::settings;

mod otp;
mod referrals;
pub mod session;
mod users;
mod wallet;

#[derive(Clone)]
pub(crate) struct AppState {
    channels: ServiceChannels,
    cookies: session::CookieSettings,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Validation(_)
            | ServiceError::Conflict(_)
            | ServiceError::InvalidState(_)
            | ServiceError::InsufficientBalance => StatusCode::BAD_REQUEST,
            ServiceError::AuthenticationRequired | ServiceError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::AuthorizationDenied => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(_)
            | ServiceError::Communication(_, _)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Validation(format!("Invalid input data: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::Validation(format!("Invalid query: {}", rejection.body_text()))
    }
}

/// Sends a request to a service and waits for its reply.
pub(crate) async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    service: &str,
    build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?
}

pub(crate) fn parse_id(raw: &str) -> Result<i64, ServiceError> {
    raw.parse::<i64>()
        .map_err(|_| ServiceError::Validation("Invalid request ID".to_string()))
}

pub fn router(channels: ServiceChannels, server: &settings::Server) -> Router {
    let state = AppState {
        channels,
        cookies: session::CookieSettings::from(server),
    };

    let admin = Router::new()
        .route(
            "/api/admin/balance-requests",
            get(wallet::list_all_balance_requests),
        )
        .route(
            "/api/admin/balance-requests/{id}/approve",
            post(wallet::approve_balance_request),
        )
        .route(
            "/api/admin/balance-requests/{id}/reject",
            post(wallet::reject_balance_request),
        )
        .route(
            "/api/admin/referrals/{id}/credit",
            post(referrals::credit_referral),
        )
        .route_layer(middleware::from_fn(session::require_admin));

    let authenticated = Router::new()
        .route("/api/auth/logout", post(users::logout))
        .route("/api/user", get(users::current_user))
        .route("/api/wallet/transactions", get(wallet::list_transactions))
        .route(
            "/api/wallet/balance-request",
            post(wallet::submit_balance_request),
        )
        .route(
            "/api/wallet/balance-requests",
            get(wallet::list_balance_requests),
        )
        .route("/api/otp/generate", post(otp::generate))
        .route(
            "/api/otp/history",
            get(otp::history).delete(otp::clear_history),
        )
        .route("/api/referrals", get(referrals::list_referrals))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    Router::new()
        .route("/api/auth/register", post(users::register))
        .route("/api/auth/login", post(users::login))
        .route("/health", get(|| async { "OK" }))
        .merge(authenticated)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    channels: ServiceChannels,
    server: &settings::Server,
) -> Result<(), anyhow::Error> {
    let app = router(channels, server);

    let listener = tokio::net::TcpListener::bind(&server.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
