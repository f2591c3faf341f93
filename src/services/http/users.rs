use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;

use super::{dispatch, session::CurrentUser, AppState};
use crate::models::users::{Credentials, Registration, User};
use crate::services::{auth::AuthRequest, ServiceError};

pub(crate) async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(registration) = payload?;

    let (user, session) = dispatch(&state.channels.auth, "Auth", |response| {
        AuthRequest::Register {
            registration,
            response,
        }
    })
    .await?;

    let cookie = state.cookies.issue(&session.token)?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(user),
    ))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(credentials) = payload?;

    let (user, session) = dispatch(&state.channels.auth, "Auth", |response| {
        AuthRequest::Login {
            credentials,
            response,
        }
    })
    .await?;

    let cookie = state.cookies.issue(&session.token)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(user)))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ServiceError> {
    dispatch(&state.channels.auth, "Auth", |response| AuthRequest::Logout {
        token: current.token,
        response,
    })
    .await?;

    let cookie = state.cookies.clear()?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Logged out" })),
    ))
}

pub(crate) async fn current_user(Extension(current): Extension<CurrentUser>) -> Json<User> {
    Json(current.user)
}
