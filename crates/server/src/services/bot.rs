//! Dispatch of Bot API webhook updates.

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::models::UserProfile;
use crate::services::payments::{PaymentGateway, PaymentOutcome};
use crate::services::UserDirectory;
use crate::telegram::{BotMessenger, BotUser, InlineKeyboardButton, InlineKeyboardMarkup, Update};

/// What an update turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    PreCheckout { approved: bool },
    Payment(PaymentOutcome),
    Started,
    Ignored,
}

/// Routes webhook updates to the payment gateway and answers `/start`.
#[derive(Clone)]
pub struct BotUpdates {
    payments: PaymentGateway,
    users: UserDirectory,
    messenger: Arc<dyn BotMessenger>,
    frontend_url: String,
}

impl BotUpdates {
    #[must_use]
    pub fn new(
        payments: PaymentGateway,
        users: UserDirectory,
        messenger: Arc<dyn BotMessenger>,
        frontend_url: &str,
    ) -> Self {
        Self {
            payments,
            users,
            messenger,
            frontend_url: frontend_url.to_string(),
        }
    }

    /// Handle one update. Never fails; problems are logged.
    #[instrument(skip(self, update), fields(update_id = update.update_id))]
    pub async fn handle_update(&self, update: &Update) -> UpdateOutcome {
        if let Some(query) = &update.pre_checkout_query {
            let approved = self.payments.answer_pre_checkout(query).await;
            return UpdateOutcome::PreCheckout { approved };
        }

        let Some(message) = &update.message else {
            debug!("Ignoring update without message");
            return UpdateOutcome::Ignored;
        };

        if let Some(payment) = &message.successful_payment {
            let outcome = self
                .payments
                .handle_successful_payment(&payment.invoice_payload, &payment.currency)
                .await;
            return UpdateOutcome::Payment(outcome);
        }

        match (&message.from, message.text.as_deref()) {
            (Some(from), Some(text)) if is_start_command(text) => {
                self.start(from, message.chat.id).await;
                UpdateOutcome::Started
            }
            _ => UpdateOutcome::Ignored,
        }
    }

    async fn start(&self, from: &BotUser, chat_id: i64) {
        let profile = UserProfile {
            username: from.username.clone(),
            first_name: from.first_name.clone(),
            last_name: from.last_name.clone(),
        };
        let name = match self.users.get_or_create(from.id, &profile).await {
            Ok(user) => user.display_name(),
            Err(e) => {
                error!(telegram_id = %from.id, error = %e, "Failed to register user from /start");
                profile.first_name.unwrap_or_default()
            }
        };

        let greeting = if name.is_empty() {
            "Welcome! Open the shop to browse consultations.".to_string()
        } else {
            format!("Welcome, {name}! Open the shop to browse consultations.")
        };
        let button = InlineKeyboardMarkup::single(InlineKeyboardButton::web_app(
            "Open shop",
            self.frontend_url.clone(),
        ));

        if let Err(e) = self
            .messenger
            .send_message(chat_id, &greeting, Some(button))
            .await
        {
            error!(chat_id, error = %e, "Failed to answer /start");
        }
    }
}

/// `/start`, optionally with a deep-link parameter or bot mention.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    command == "/start" || command.starts_with("/start@")
}
