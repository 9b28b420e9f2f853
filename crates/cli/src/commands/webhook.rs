//! Webhook registration.
//!
//! # Environment Variables
//!
//! - `TELEGRAM_BOT_TOKEN` - Bot token
//! - `TELEGRAM_WEBHOOK_SECRET` - Optional secret Telegram echoes in
//!   `X-Telegram-Bot-Api-Secret-Token`; must match the server's
//! - `TELEGRAM_API_URL` - Bot API base URL (default: <https://api.telegram.org>)

use secrecy::ExposeSecret;
use tracing::info;

use starshop_server::telegram::BotClient;

use super::required_secret;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

fn client() -> Result<BotClient, super::CommandError> {
    let bot_token = required_secret("TELEGRAM_BOT_TOKEN")?;
    let api_url = std::env::var("TELEGRAM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    Ok(BotClient::new(api_url, bot_token))
}

/// Register `url` as the bot's webhook.
///
/// # Errors
///
/// Returns an error if the URL is not HTTPS or the Bot API call fails.
pub async fn set(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !url.starts_with("https://") {
        return Err(format!("Webhook URL must be HTTPS: {url}").into());
    }

    let client = client()?;
    let secret = required_secret("TELEGRAM_WEBHOOK_SECRET").ok();
    if secret.is_none() {
        info!("TELEGRAM_WEBHOOK_SECRET not set, webhook will be unauthenticated");
    }

    client
        .set_webhook(url, secret.as_ref().map(ExposeSecret::expose_secret))
        .await?;
    info!(url, "Webhook registered");
    Ok(())
}

/// Remove the bot's webhook.
///
/// # Errors
///
/// Returns an error if the Bot API call fails.
pub async fn delete() -> Result<(), Box<dyn std::error::Error>> {
    client()?.delete_webhook().await?;
    info!("Webhook removed");
    Ok(())
}
