//! Operator dashboard API.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use starshop_core::{MessageId, OrderId, OrderStatus};

use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::models::{Message, Order, OrderStats, ThreadSummary};
use crate::services::ThreadScope;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub reply: String,
}

/// Dashboard counters.
#[derive(Debug, Serialize)]
pub struct Stats {
    #[serde(flatten)]
    pub orders: OrderStats,
    pub total_users: i64,
    pub unread_messages: i64,
}

/// All orders, optionally filtered by status.
pub async fn orders(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<OrderStatus>()
                .map_err(|_| AppError::BadRequest(format!("unknown status {s:?}")))
        })
        .transpose()?;
    Ok(Json(state.ledger().list_all(status).await?))
}

/// Every order thread, with unread customer messages counted.
pub async fn threads(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<ThreadSummary>>> {
    Ok(Json(state.chat().threads(ThreadScope::Admin).await?))
}

/// Attach a reply to a customer message.
pub async fn reply(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(message_id): Path<MessageId>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<Message>> {
    Ok(Json(state.chat().reply(message_id, &body.reply).await?))
}

/// Delete every message of an order's thread.
pub async fn clear_thread(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(order_id): Path<OrderId>,
) -> Result<StatusCode> {
    state.ledger().get(order_id).await?;
    state.chat().clear(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Stats>> {
    Ok(Json(Stats {
        orders: state.ledger().stats().await?,
        total_users: state.users().count().await?,
        unread_messages: state.chat().unread_for_admins().await?,
    }))
}
