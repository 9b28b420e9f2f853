//! Signed init data for local testing.
//!
//! The output can be sent as the `X-Telegram-Init-Data` header or as
//! `init_data` to `POST /api/auth/login`.

use secrecy::ExposeSecret;

use starshop_server::telegram::sign_init_data;

use super::required_secret;

/// Build the `user` field the Mini App would send.
fn user_json(telegram_id: i64, username: Option<&str>, first_name: &str) -> String {
    let mut user = serde_json::json!({
        "id": telegram_id,
        "first_name": first_name,
    });
    if let Some(username) = username {
        user["username"] = serde_json::Value::from(username);
    }
    user.to_string()
}

/// Sign init data for a test user with `TELEGRAM_BOT_TOKEN`.
///
/// # Errors
///
/// Returns an error if the bot token is not set.
pub fn sign(
    telegram_id: i64,
    username: Option<&str>,
    first_name: &str,
    auth_date: Option<i64>,
) -> Result<String, Box<dyn std::error::Error>> {
    let bot_token = required_secret("TELEGRAM_BOT_TOKEN")?;
    let auth_date = auth_date
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
        .to_string();
    let user = user_json(telegram_id, username, first_name);

    Ok(sign_init_data(
        &[("auth_date", &auth_date), ("user", &user)],
        bot_token.expose_secret(),
    )?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_json() {
        let value: serde_json::Value =
            serde_json::from_str(&user_json(123_456_789, Some("alice"), "Alice")).unwrap();
        assert_eq!(value["id"], 123_456_789);
        assert_eq!(value["username"], "alice");

        let value: serde_json::Value =
            serde_json::from_str(&user_json(1, None, "Bob")).unwrap();
        assert!(value.get("username").is_none());
    }
}
