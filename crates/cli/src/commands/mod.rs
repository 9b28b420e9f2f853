//! CLI command implementations.

pub mod init_data;
pub mod migrate;
pub mod seed;
pub mod webhook;

use secrecy::SecretString;
use thiserror::Error;

/// Errors shared by the commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read a required secret after loading `.env`.
pub(crate) fn required_secret(key: &'static str) -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();
    std::env::var(key)
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar(key))
}

/// `STARSHOP_DATABASE_URL`, falling back to `DATABASE_URL`.
pub(crate) fn database_url() -> Result<SecretString, CommandError> {
    required_secret("STARSHOP_DATABASE_URL").or_else(|_| required_secret("DATABASE_URL"))
}
