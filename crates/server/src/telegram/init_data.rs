//! Mini App init data verification.
//!
//! Telegram signs the init data it hands to a Mini App with a key derived
//! from the bot token:
//!
//! ```text
//! secret_key = HMAC_SHA256(key = "WebAppData", message = bot_token)
//! hash       = hex(HMAC_SHA256(key = secret_key, message = data_check_string))
//! ```
//!
//! where `data_check_string` is every received field except `hash`, formatted
//! as `key=value`, sorted by key and joined with `\n`.
//!
//! See: <https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app>
//!
//! Only this Mini App scheme is accepted. The Login Widget scheme (which keys
//! the HMAC with `SHA256(bot_token)`) produces different hashes and is
//! rejected as an invalid signature.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use starshop_core::TelegramId;
use thiserror::Error;
use tracing::{debug, instrument};

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_KEY: &[u8] = b"WebAppData";

/// Reasons init data can be rejected.
///
/// All of them surface to the client as `401 Unauthorized`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The payload has no `hash` field.
    #[error("init data has no hash")]
    MissingHash,
    /// The hash does not match the payload.
    #[error("init data signature is invalid")]
    InvalidSignature,
    /// `auth_date` is missing, malformed, or outside the accepted window.
    #[error("init data has expired")]
    Expired,
    /// The `user` field is missing or is not a Telegram user object.
    #[error("init data carries no user")]
    MissingUser,
    /// No init data or session was presented.
    #[error("authentication required")]
    Unauthenticated,
}

/// The Telegram user embedded in init data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAppUser {
    pub id: TelegramId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

/// Verified init data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: WebAppUser,
    pub auth_date: DateTime<Utc>,
    pub query_id: Option<String>,
    pub start_param: Option<String>,
}

/// Verifies init data against one bot token.
#[derive(Clone)]
pub struct InitDataVerifier {
    bot_token: SecretString,
    ttl: Duration,
}

impl std::fmt::Debug for InitDataVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataVerifier")
            .field("bot_token", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl InitDataVerifier {
    #[must_use]
    pub const fn new(bot_token: SecretString, ttl: Duration) -> Self {
        Self { bot_token, ttl }
    }

    /// Verify init data against the current time.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] the payload trips over.
    pub fn verify(&self, raw: &str) -> Result<InitData, AuthError> {
        self.verify_at(raw, Utc::now().timestamp())
    }

    /// Verify init data as if the current Unix time were `now`.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] the payload trips over.
    pub fn verify_at(&self, raw: &str, now: i64) -> Result<InitData, AuthError> {
        verify_init_data(raw, self.bot_token.expose_secret(), self.ttl, now)
    }
}

/// Verify a raw init data query string.
///
/// Checks run in order: hash present, signature, freshness, user. Freshness
/// fails when `|now - auth_date| > ttl`, so a payload exactly `ttl` seconds
/// old is still accepted.
///
/// # Errors
///
/// Returns the first [`AuthError`] the payload trips over.
#[instrument(skip_all)]
pub fn verify_init_data(
    raw: &str,
    bot_token: &str,
    ttl: Duration,
    now: i64,
) -> Result<InitData, AuthError> {
    let mut fields = parse_fields(raw);

    let received = fields.remove("hash").ok_or(AuthError::MissingHash)?;
    let expected = hex::encode(compute_hash(&fields, bot_token)?);
    if !constant_time_eq(
        expected.as_bytes(),
        received.to_ascii_lowercase().as_bytes(),
    ) {
        return Err(AuthError::InvalidSignature);
    }

    let auth_date: i64 = fields
        .get("auth_date")
        .and_then(|v| v.parse().ok())
        .ok_or(AuthError::Expired)?;
    if now.abs_diff(auth_date) > ttl.as_secs() {
        debug!(auth_date, now, "Init data outside freshness window");
        return Err(AuthError::Expired);
    }
    let auth_date = DateTime::from_timestamp(auth_date, 0).ok_or(AuthError::Expired)?;

    let user: WebAppUser = fields
        .get("user")
        .and_then(|raw_user| serde_json::from_str(raw_user).ok())
        .ok_or(AuthError::MissingUser)?;

    debug!(telegram_id = %user.id, "Init data verified");

    Ok(InitData {
        user,
        auth_date,
        query_id: fields.remove("query_id"),
        start_param: fields.remove("start_param"),
    })
}

/// Sign a set of fields the way Telegram does, returning a query string.
///
/// Used by development tooling and tests to produce init data that
/// [`verify_init_data`] accepts.
///
/// # Errors
///
/// Returns [`AuthError::InvalidSignature`] if the HMAC cannot be keyed.
pub fn sign_init_data(fields: &[(&str, &str)], bot_token: &str) -> Result<String, AuthError> {
    let map: BTreeMap<String, String> = fields
        .iter()
        .filter(|(key, _)| *key != "hash")
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    let hash = hex::encode(compute_hash(&map, bot_token)?);

    let mut query: Vec<String> = map
        .iter()
        .map(|(key, value)| {
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
        })
        .collect();
    query.push(format!("hash={hash}"));
    Ok(query.join("&"))
}

/// Split `a=1&b=2` into decoded pairs, sorted by key.
///
/// Repeated keys keep the last value.
fn parse_fields(raw: &str) -> BTreeMap<String, String> {
    raw.trim()
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), std::borrow::Cow::into_owned)
}

fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn compute_hash(fields: &BTreeMap<String, String>, bot_token: &str) -> Result<Vec<u8>, AuthError> {
    let secret_key = hmac_sha256(WEB_APP_KEY, bot_token.as_bytes())?;
    hmac_sha256(&secret_key, data_check_string(fields).as_bytes())
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuthError::InvalidSignature)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";
    const USER_JSON: &str =
        r#"{"id":123456789,"first_name":"Anna","username":"anna_k","language_code":"en"}"#;
    const NOW: i64 = 1_700_000_000;
    const TTL: Duration = Duration::from_secs(86_400);

    fn signed(auth_date: i64) -> String {
        let auth_date = auth_date.to_string();
        sign_init_data(
            &[
                ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
                ("user", USER_JSON),
                ("auth_date", &auth_date),
            ],
            BOT_TOKEN,
        )
        .unwrap()
    }

    fn verify(raw: &str) -> Result<InitData, AuthError> {
        verify_init_data(raw, BOT_TOKEN, TTL, NOW)
    }

    #[test]
    fn test_round_trip() {
        let data = verify(&signed(NOW - 60)).unwrap();
        assert_eq!(data.user.id, TelegramId::new(123_456_789));
        assert_eq!(data.user.username.as_deref(), Some("anna_k"));
        assert_eq!(data.query_id.as_deref(), Some("AAHdF6IQAAAAAN0XohDhrOrc"));
        assert_eq!(data.auth_date.timestamp(), NOW - 60);
    }

    #[test]
    fn test_flipped_hash_character_is_rejected() {
        let raw = signed(NOW);
        let (body, hash) = raw.rsplit_once("hash=").unwrap();
        let mut chars: Vec<char> = hash.chars().collect();
        chars[0] = if chars[0] == 'a' { 'b' } else { 'a' };
        let tampered = format!("{body}hash={}", chars.into_iter().collect::<String>());

        assert_eq!(verify(&tampered), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_uppercase_hash_is_accepted() {
        let raw = signed(NOW);
        let (body, hash) = raw.rsplit_once("hash=").unwrap();
        let upper = format!("{body}hash={}", hash.to_ascii_uppercase());
        assert!(verify(&upper).is_ok());
    }

    #[test]
    fn test_tampered_field_is_rejected() {
        let raw = signed(NOW).replace("anna_k", "mallory");
        assert_eq!(verify(&raw), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_wrong_token_is_rejected() {
        let raw = signed(NOW);
        let result = verify_init_data(
            &raw,
            "987654321:BBHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw",
            TTL,
            NOW,
        );
        assert_eq!(result, Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_login_widget_scheme_is_rejected() {
        use sha2::Digest;

        let fields: BTreeMap<String, String> = [
            ("auth_date".to_string(), NOW.to_string()),
            ("user".to_string(), USER_JSON.to_string()),
        ]
        .into_iter()
        .collect();
        let widget_key = Sha256::digest(BOT_TOKEN.as_bytes());
        let hash = hex::encode(
            hmac_sha256(&widget_key, data_check_string(&fields).as_bytes()).unwrap(),
        );
        let raw = format!(
            "auth_date={NOW}&user={}&hash={hash}",
            urlencoding::encode(USER_JSON)
        );

        assert_eq!(verify(&raw), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_missing_hash() {
        let raw = format!("auth_date={NOW}&user={}", urlencoding::encode(USER_JSON));
        assert_eq!(verify(&raw), Err(AuthError::MissingHash));
    }

    #[test]
    fn test_freshness_boundary() {
        let ttl = i64::try_from(TTL.as_secs()).unwrap();
        assert!(verify(&signed(NOW - ttl)).is_ok());
        assert_eq!(verify(&signed(NOW - ttl - 1)), Err(AuthError::Expired));
        // Clock skew is bounded the same way in the other direction.
        assert!(verify(&signed(NOW + ttl)).is_ok());
        assert_eq!(verify(&signed(NOW + ttl + 1)), Err(AuthError::Expired));
    }

    #[test]
    fn test_missing_auth_date_is_expired() {
        let raw = sign_init_data(&[("user", USER_JSON)], BOT_TOKEN).unwrap();
        assert_eq!(verify(&raw), Err(AuthError::Expired));
    }

    #[test]
    fn test_missing_user() {
        let now = NOW.to_string();
        let raw = sign_init_data(&[("auth_date", &now)], BOT_TOKEN).unwrap();
        assert_eq!(verify(&raw), Err(AuthError::MissingUser));
    }

    #[test]
    fn test_malformed_user() {
        let now = NOW.to_string();
        let raw = sign_init_data(
            &[("auth_date", &now), ("user", r#"{"first_name":"NoId"}"#)],
            BOT_TOKEN,
        )
        .unwrap();
        assert_eq!(verify(&raw), Err(AuthError::MissingUser));
    }

    #[test]
    fn test_signature_field_is_part_of_check_string() {
        let now = NOW.to_string();
        let raw = sign_init_data(
            &[
                ("auth_date", &now),
                ("signature", "c2lnbmF0dXJl"),
                ("user", USER_JSON),
            ],
            BOT_TOKEN,
        )
        .unwrap();
        assert!(verify(&raw).is_ok());

        let stripped = raw.replace("signature=c2lnbmF0dXJl&", "");
        assert_eq!(verify(&stripped), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let fields = parse_fields("start_param=a+b&user=%7B%7D");
        assert_eq!(fields.get("start_param").map(String::as_str), Some("a b"));
        assert_eq!(fields.get("user").map(String::as_str), Some("{}"));
    }

    #[test]
    fn test_verifier_uses_configured_ttl() {
        let verifier = InitDataVerifier::new(
            SecretString::from(BOT_TOKEN.to_string()),
            Duration::from_secs(60),
        );
        assert!(verifier.verify_at(&signed(NOW - 60), NOW).is_ok());
        assert_eq!(
            verifier.verify_at(&signed(NOW - 61), NOW),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_verifier_debug_redacts_token() {
        let verifier = InitDataVerifier::new(SecretString::from(BOT_TOKEN.to_string()), TTL);
        assert!(!format!("{verifier:?}").contains("AAHdq"));
    }
}
