//! Stars payments: invoice creation and the Bot API webhook.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use starshop_core::{OrderId, ProductId};

use crate::config::secret_matches;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::CurrentUser;
use crate::services::Invoice;
use crate::state::AppState;
use crate::telegram::Update;

/// Header Telegram sets to the secret registered with `setWebhook`.
pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
pub struct InitPaymentRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

const fn default_quantity() -> i32 {
    1
}

/// Create an order and return its invoice link.
pub async fn init_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<InitPaymentRequest>,
) -> Result<(StatusCode, Json<Invoice>)> {
    let invoice = state
        .payments()
        .init_payment(&user, body.product_id, body.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Issue a new link for a pending order.
pub async fn retry_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Invoice>> {
    Ok(Json(state.payments().retry_invoice(&user, order_id).await?))
}

/// Bot API webhook.
///
/// Always answers `200 {}` so Telegram does not redeliver; updates with a
/// wrong secret token or an unreadable body are logged and dropped.
#[instrument(skip_all)]
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    if let Some(expected) = state.config().telegram.webhook_secret.as_ref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !secret_matches(expected, presented) {
            warn!("Webhook call with wrong secret token");
            return Json(json!({}));
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Unreadable webhook update");
            return Json(json!({}));
        }
    };

    let update_id = update.update_id.to_string();
    add_breadcrumb("telegram", "Webhook update", Some(&[("update_id", update_id.as_str())]));
    state.bot().handle_update(&update).await;

    Json(json!({}))
}
