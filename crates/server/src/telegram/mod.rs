//! Telegram integration.
//!
//! This module provides:
//! - [`InitDataVerifier`] for authenticating Mini App requests
//! - [`BotClient`] for the Bot API methods the shop calls
//! - Bot API types for webhook updates and Stars payments
//!
//! # Payment flow
//!
//! 1. The Mini App asks for an invoice; the server calls `createInvoiceLink`
//!    with currency `XTR` and the order id in the payload
//! 2. Telegram sends a `pre_checkout_query` to the webhook, which must be
//!    answered quickly
//! 3. Telegram sends a message carrying `successful_payment`; the order is
//!    marked paid

mod client;
mod error;
mod init_data;
mod types;

pub use client::{BotClient, BotMessenger, InvoiceProvider};
pub use error::TelegramError;
pub use init_data::{
    AuthError, InitData, InitDataVerifier, WebAppUser, sign_init_data, verify_init_data,
};
pub use types::{
    AnswerPreCheckoutQuery, ApiResponse, BotUser, Chat, CreateInvoiceLink,
    InlineKeyboardButton, InlineKeyboardMarkup, InvoicePayload, LabeledPrice, Message,
    PreCheckoutQuery, SendMessage, SetWebhook, SuccessfulPayment, Update, WebAppInfo,
};

/// Constant-time byte comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }

    result == 0
}
