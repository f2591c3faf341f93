use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::Value;

use super::{dispatch, parse_id, session::CurrentUser, AppState};
use crate::models::{
    balance_requests::{
        ApprovedBalanceRequest, BalanceRequest, BalanceRequestFilter, BalanceRequestSubmission,
    },
    money,
    transactions::Transaction,
};
use crate::services::{wallet::WalletRequest, ServiceError};

pub(crate) async fn list_transactions(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Transaction>>, ServiceError> {
    let transactions = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::ListTransactions {
            user_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(transactions))
}

/// Amounts must arrive as JSON numbers; anything else is handed on as zero
/// and rejected by the wallet along with non-positive values.
pub(crate) async fn submit_balance_request(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    payload: Result<Json<BalanceRequestSubmission>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(submission) = payload?;

    let amount = match &submission.amount {
        Some(Value::Number(n)) => n.as_f64().and_then(money::from_rupees).unwrap_or(0),
        _ => 0,
    };
    let utr_number = match submission.utr_number {
        Some(Value::String(utr)) => utr,
        _ => String::new(),
    };

    let request = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::SubmitBalanceRequest {
            user_id: current.user.id,
            amount,
            utr_number,
            response,
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

pub(crate) async fn list_balance_requests(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<BalanceRequest>>, ServiceError> {
    let requests = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::ListBalanceRequests {
            user_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(requests))
}

pub(crate) async fn list_all_balance_requests(
    State(state): State<AppState>,
    filter: Result<Query<BalanceRequestFilter>, QueryRejection>,
) -> Result<Json<Vec<BalanceRequest>>, ServiceError> {
    let Query(filter) = filter?;

    let requests = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::ListAllBalanceRequests {
            status: filter.status,
            response,
        }
    })
    .await?;

    Ok(Json(requests))
}

pub(crate) async fn approve_balance_request(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApprovedBalanceRequest>, ServiceError> {
    let request_id = parse_id(&id)?;

    let approved = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::ApproveBalanceRequest {
            request_id,
            admin_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(approved))
}

pub(crate) async fn reject_balance_request(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<BalanceRequest>, ServiceError> {
    let request_id = parse_id(&id)?;

    let rejected = dispatch(&state.channels.wallet, "Wallet", |response| {
        WalletRequest::RejectBalanceRequest {
            request_id,
            admin_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(rejected))
}
