//! Order chat for customers and operators.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use starshop_core::{MessageId, OrderId, SenderRole};

use crate::error::{AppError, Result};
use crate::middleware::CurrentUser;
use crate::models::{Message, Order, ThreadSummary, User};
use crate::services::{AuthorizationError, ThreadScope, ensure_order_access};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub since: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// Parse an optional ISO 8601 query timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// read as UTC.
pub(crate) fn parse_timestamp(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|t| t.and_utc())
                })
                .map_err(|_| AppError::BadRequest(format!("invalid {name} timestamp")))
        })
        .transpose()
}

async fn accessible_order(state: &AppState, user: &User, order_id: OrderId) -> Result<Order> {
    let order = state.ledger().get(order_id).await?;
    ensure_order_access(user, &order)?;
    Ok(order)
}

/// The caller's threads, newest activity first.
pub async fn threads(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ThreadSummary>>> {
    Ok(Json(
        state.chat().threads(ThreadScope::Customer(user.id)).await?,
    ))
}

/// Message history of an order.
pub async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>> {
    let since = parse_timestamp("since", query.since.as_deref())?;
    accessible_order(&state, &user, order_id).await?;
    Ok(Json(state.chat().list_messages(order_id, since).await?))
}

/// Long-poll for new messages of an order.
///
/// Returns as soon as something newer than `after` exists, or an empty list
/// after the configured timeout or on shutdown.
#[instrument(skip(state, user, query), fields(order_id = %order_id))]
pub async fn poll(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Vec<Message>>> {
    let after = parse_timestamp("after", query.after.as_deref())?;
    accessible_order(&state, &user, order_id).await?;

    let messages = state
        .chat()
        .poll_messages(
            order_id,
            after,
            state.chat().long_poll().timeout,
            state.shutdown_token(),
        )
        .await?;
    Ok(Json(messages))
}

/// Post to an order's thread.
pub async fn post_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    let order = accessible_order(&state, &user, order_id).await?;
    let message = state.chat().post_message(&order, &user, &body.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Mark the other side's messages as read.
pub async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<MarkReadResponse>> {
    accessible_order(&state, &user, order_id).await?;
    let updated = state
        .chat()
        .mark_read(order_id, SenderRole::from_admin_flag(user.is_admin))
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// Delete a message; its author or an operator only.
pub async fn delete_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<MessageId>,
) -> Result<StatusCode> {
    let message = state.chat().get(message_id).await?;
    if !user.is_admin && message.user_id != user.id {
        return Err(AuthorizationError::NotOwner.into());
    }
    state.chat().delete(&message).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("since", None).unwrap().is_none());
        assert!(parse_timestamp("since", Some("")).unwrap().is_none());
        let parsed = parse_timestamp("since", Some("2026-03-01T10:00:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T10:00:00+00:00");
        assert!(matches!(
            parse_timestamp("after", Some("yesterday")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let parsed = parse_timestamp("since", Some("2026-03-01T10:00:00"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T10:00:00+00:00");

        let parsed = parse_timestamp("after", Some("2026-03-01T10:00:00.123456"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 123_456);

        let offset = parse_timestamp("since", Some("2026-03-01T12:00:00+02:00"))
            .unwrap()
            .unwrap();
        let naive = parse_timestamp("since", Some("2026-03-01T10:00:00"))
            .unwrap()
            .unwrap();
        assert_eq!(offset, naive);
    }
}
