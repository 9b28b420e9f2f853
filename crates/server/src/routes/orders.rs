//! Orders of the current user.

use axum::{
    Json,
    extract::{Path, State},
};

use starshop_core::OrderId;

use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::Order;
use crate::services::ensure_order_access;
use crate::state::AppState;

/// The caller's orders, newest first.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.ledger().list_by_user(user.id).await?))
}

/// One order; owners and operators only.
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>> {
    let order = state.ledger().get(order_id).await?;
    ensure_order_access(&user, &order)?;
    Ok(Json(order))
}
