//! Telegram Bot API client.
//!
//! Provides the outbound calls the shop needs: Stars invoice links,
//! pre-checkout answers, plain messages and webhook registration.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument};

use super::error::TelegramError;
use super::types::{
    AnswerPreCheckoutQuery, ApiResponse, CreateInvoiceLink, InlineKeyboardMarkup, SendMessage,
    SetWebhook,
};

/// Issues invoices and answers pre-checkout queries.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared by
/// every request handler.
#[async_trait]
pub trait InvoiceProvider: Send + Sync {
    /// Request a payment link for the given invoice.
    async fn create_invoice_link(&self, invoice: &CreateInvoiceLink)
    -> Result<String, TelegramError>;

    /// Approve (`error_message == None`) or deny a pre-checkout query.
    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        error_message: Option<&str>,
    ) -> Result<(), TelegramError>;
}

/// Sends bot messages to Telegram chats.
#[async_trait]
pub trait BotMessenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError>;
}

/// Bot API client.
#[derive(Clone)]
pub struct BotClient {
    /// HTTP client.
    client: Client,
    /// API base URL, without trailing slash.
    api_url: String,
    /// Bot token, part of every method URL.
    bot_token: SecretString,
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient")
            .field("api_url", &self.api_url)
            .field("bot_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl BotClient {
    /// Create a new Bot API client.
    #[must_use]
    pub fn new(api_url: impl Into<String>, bot_token: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    /// Register the webhook URL Telegram should deliver updates to.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or Telegram returns an error.
    #[instrument(skip(self, secret_token))]
    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<(), TelegramError> {
        let body = SetWebhook {
            url: url.to_string(),
            secret_token: secret_token.map(String::from),
            allowed_updates: vec!["message".to_string(), "pre_checkout_query".to_string()],
            drop_pending_updates: false,
        };
        let _: bool = self.call("setWebhook", &body).await?;
        Ok(())
    }

    /// Remove the webhook.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or Telegram returns an error.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self
            .call("deleteWebhook", &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TelegramError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!(
            "{}/bot{}/{method}",
            self.api_url,
            self.bot_token.expose_secret()
        );

        let response = self.client.post(url).json(body).send().await?;
        let result: ApiResponse<T> = response.json().await?;

        if !result.ok {
            let description = result
                .description
                .unwrap_or_else(|| "Unknown error".to_string());
            error!(method, error = %description, "Telegram API error");
            return Err(TelegramError::Api {
                code: result.error_code.unwrap_or_default(),
                description,
            });
        }

        result
            .result
            .ok_or_else(|| TelegramError::Response(format!("{method} returned no result")))
    }
}

#[async_trait]
impl InvoiceProvider for BotClient {
    #[instrument(skip(self, invoice), fields(payload = %invoice.payload))]
    async fn create_invoice_link(
        &self,
        invoice: &CreateInvoiceLink,
    ) -> Result<String, TelegramError> {
        let link: String = self.call("createInvoiceLink", invoice).await?;
        debug!("Invoice link created");
        Ok(link)
    }

    #[instrument(skip(self))]
    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        error_message: Option<&str>,
    ) -> Result<(), TelegramError> {
        let body = AnswerPreCheckoutQuery {
            pre_checkout_query_id: query_id.to_string(),
            ok: error_message.is_none(),
            error_message: error_message.map(String::from),
        };
        let _: bool = self.call("answerPreCheckoutQuery", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl BotMessenger for BotClient {
    #[instrument(skip(self, text, reply_markup))]
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let body = SendMessage {
            chat_id,
            text: text.to_string(),
            reply_markup,
        };
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }
}
