use axum::{body::Bytes, extract::State, Extension, Json};
use serde_json::{json, Value};

use super::{dispatch, session::CurrentUser, AppState};
use crate::models::{
    money,
    otp::{IssuedOtp, OtpHistory, OtpOrder},
};
use crate::services::{otp::OtpRequest, ServiceError};

/// Accepts an empty body; every field of the order is optional.
pub(crate) async fn generate(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Json<IssuedOtp>, ServiceError> {
    let order: OtpOrder = if body.iter().all(u8::is_ascii_whitespace) {
        OtpOrder::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::Validation(format!("Invalid input data: {}", e)))?
    };

    let issued = dispatch(&state.channels.otp, "OTP", |response| OtpRequest::Generate {
        user_id: current.user.id,
        service_id: order.service_id,
        service_name: order.service_name,
        price: order.price.as_ref().and_then(money::parse_rupees),
        response,
    })
    .await?;

    Ok(Json(issued))
}

pub(crate) async fn history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<OtpHistory>>, ServiceError> {
    let history = dispatch(&state.channels.otp, "OTP", |response| {
        OtpRequest::GetHistory {
            user_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(history))
}

pub(crate) async fn clear_history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Value>, ServiceError> {
    dispatch(&state.channels.otp, "OTP", |response| {
        OtpRequest::ClearHistory {
            user_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(json!({ "message": "OTP history cleared" })))
}
