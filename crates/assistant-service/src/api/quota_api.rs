//! GET /quota: current month's usage for the token's account.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::metrics;
use crate::quota::QuotaLedger;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub used: i64,
    pub remaining: i64,
    pub has_subscription: bool,
}

pub async fn get_quota(State(state): State<AppState>, Query(query): Query<QuotaQuery>) -> Response {
    let response = quota_response(&state, &query.token).await;
    metrics::inc_request("/quota", response.status().as_str());
    response
}

async fn quota_response(state: &AppState, token: &str) -> Response {
    if token.is_empty() {
        warn!("No token provided.");
        return (StatusCode::NOT_FOUND, "No token provided.").into_response();
    }
    let services = &state.services;
    let user = match services.identity.resolve(token).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Error getting user info: {}", e);
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };
    if !user.has_subscription {
        return Json(QuotaResponse {
            used: 0,
            remaining: 0,
            has_subscription: false,
        })
        .into_response();
    }

    let ledger = QuotaLedger::with_cap(
        services.store.clone(),
        user.user_id,
        services.settings.monthly_quota_credits,
    );
    match ledger.get_quota().await {
        Ok((used, remaining)) => Json(QuotaResponse {
            used,
            remaining,
            has_subscription: true,
        })
        .into_response(),
        Err(e) => {
            error!(user_id = user.user_id, "Error getting quota: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
