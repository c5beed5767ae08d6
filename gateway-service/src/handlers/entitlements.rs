//! Current entitlements for the authenticated user: resolved tier plus
//! per-operation daily limits and today's usage.

use axum::{extract::State, Json};
use serde::Serialize;
use service_core::error::AppError;

use crate::middleware::UserIdentity;
use crate::models::{OperationKind, Tier};
use crate::services::quota::{limit_for, today_utc};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    pub user_id: String,
    pub tier: Tier,
    pub date: String,
    pub operations: Vec<OperationEntitlement>,
}

#[derive(Debug, Serialize)]
pub struct OperationEntitlement {
    pub kind: OperationKind,
    /// Daily ceiling; absent means unlimited.
    pub daily_limit: Option<u32>,
    pub used_today: i64,
}

pub async fn entitlements(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<EntitlementsResponse>, AppError> {
    let tier = state
        .repository
        .get_tier(&identity.user_id)
        .await
        .map_err(AppError::DatabaseError)?
        .map(|t| t.tier)
        .unwrap_or(Tier::Free);

    let date = today_utc();
    let mut operations = Vec::new();

    for kind in [OperationKind::Screenshot, OperationKind::Preview] {
        let used_today = state
            .repository
            .get_usage(&identity.user_id, kind, &date)
            .await
            .map_err(AppError::DatabaseError)?;

        operations.push(OperationEntitlement {
            kind,
            daily_limit: limit_for(tier, kind).daily(),
            used_today,
        });
    }

    Ok(Json(EntitlementsResponse {
        user_id: identity.user_id,
        tier,
        date,
        operations,
    }))
}
