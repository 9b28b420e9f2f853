//! Telegram Bot API types.
//!
//! These types represent the subset of the Bot API used by the shop: the
//! webhook update envelope, Stars payment objects and the request bodies of
//! the methods the client calls. Unknown fields are ignored on input.
//!
//! See: <https://core.telegram.org/bots/api>

use serde::{Deserialize, Serialize};
use starshop_core::{OrderId, TelegramId};

// =============================================================================
// Incoming
// =============================================================================

/// A webhook update. Only the shapes the shop reacts to are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

/// A chat message sent to the bot.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<BotUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

/// A Telegram account as seen by the bot.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: TelegramId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Sent by Telegram right before charging the user; must be answered
/// within ten seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: BotUser,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

/// Service message confirming a completed payment.
#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulPayment {
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
    #[serde(default)]
    pub telegram_payment_charge_id: Option<String>,
    #[serde(default)]
    pub provider_payment_charge_id: Option<String>,
}

/// Opaque payload attached to every invoice so callbacks can find the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub order_id: OrderId,
}

impl InvoicePayload {
    /// Parse the payload string echoed back by Telegram.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// JSON form sent with the invoice, e.g. `{"order_id":42}`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(r#"{{"order_id":{}}}"#, self.order_id)
    }
}

// =============================================================================
// Outgoing
// =============================================================================

/// Envelope of every Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledPrice {
    pub label: String,
    pub amount: i64,
}

/// Body of `createInvoiceLink` for a Stars invoice.
///
/// Stars invoices carry no provider token and exactly one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateInvoiceLink {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub prices: Vec<LabeledPrice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerPreCheckoutQuery {
    pub pre_checkout_query_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetWebhook {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<String>,
    pub allowed_updates: Vec<String>,
    pub drop_pending_updates: bool,
}

/// Inline keyboard attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// A keyboard with a single button.
    #[must_use]
    pub fn single(button: InlineKeyboardButton) -> Self {
        Self {
            inline_keyboard: vec![vec![button]],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebAppInfo>,
}

impl InlineKeyboardButton {
    /// A button that opens the Mini App at `url`.
    #[must_use]
    pub fn web_app(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            web_app: Some(WebAppInfo { url: url.into() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebAppInfo {
    pub url: String,
}
