use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{dispatch, parse_id, session::CurrentUser, AppState};
use crate::models::referrals::{CreditedReferral, Referral};
use crate::services::{referrals::ReferralRequest, ServiceError};

pub(crate) async fn list_referrals(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Referral>>, ServiceError> {
    let referrals = dispatch(&state.channels.referrals, "Referral", |response| {
        ReferralRequest::ListReferrals {
            referrer_id: current.user.id,
            response,
        }
    })
    .await?;

    Ok(Json(referrals))
}

pub(crate) async fn credit_referral(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CreditedReferral>, ServiceError> {
    let referral_id = parse_id(&id)?;

    let credited = dispatch(&state.channels.referrals, "Referral", |response| {
        ReferralRequest::CreditReferral {
            referral_id,
            response,
        }
    })
    .await?;

    Ok(Json(credited))
}
