//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers return `Result<T, AppError>`;
//! error bodies are JSON `{"error": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{AuthorizationError, ChatError, OrderError, PaymentError};
use crate::telegram::AuthError;

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Caller could not be authenticated.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Caller may not access the resource.
    #[error("Forbidden: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

const INTERNAL: &str = "Internal server error";

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::NotFound(_) | OrderError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
        OrderError::InvalidStatus(_) => StatusCode::CONFLICT,
        OrderError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Order(err) => order_status(err),
            Self::Payment(err) => match err {
                PaymentError::ProviderUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
                PaymentError::Order(err) => order_status(err),
                PaymentError::Authorization(_) => StatusCode::FORBIDDEN,
            },
            Self::Chat(err) => match err {
                ChatError::EmptyMessage | ChatError::TooLong => StatusCode::BAD_REQUEST,
                ChatError::MessageNotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Message shown to the client. Server-side details are never included.
    fn public_message(&self) -> String {
        if self.status().is_server_error() {
            return match self {
                Self::Payment(PaymentError::ProviderUnavailable(_)) => {
                    "Payment provider unavailable".to_string()
                }
                _ => INTERNAL.to_string(),
            };
        }

        match self {
            Self::Auth(err) => err.to_string(),
            Self::Authorization(err) => err.to_string(),
            Self::Order(err) | Self::Payment(PaymentError::Order(err)) => err.to_string(),
            Self::Payment(err) => err.to_string(),
            Self::Chat(err) => err.to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Unauthorized(msg) | Self::BadRequest(msg) => msg.clone(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, username: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            username: username.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for bot and payment events.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of events
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use starshop_core::{MessageId, OrderId, OrderStatus, ProductId};

    use super::*;
    use crate::telegram::TelegramError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    async fn body(err: AppError) -> serde_json::Value {
        let bytes = axum::body::to_bytes(err.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_string());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::Auth(AuthError::InvalidSignature)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AuthorizationError::NotOwner.into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(OrderError::NotFound(OrderId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(OrderError::ProductNotFound(ProductId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(ChatError::MessageNotFound(MessageId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(OrderError::InvalidStatus(OrderStatus::Paid).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(ChatError::EmptyMessage.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(PaymentError::Order(OrderError::InvalidQuantity(0)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_provider_failure_hides_details() {
        let err: AppError =
            PaymentError::ProviderUnavailable(TelegramError::Request("secret host".to_string()))
                .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body(err).await;
        assert_eq!(json["error"], "Payment provider unavailable");
    }

    #[tokio::test]
    async fn test_database_error_is_generic() {
        let json = body(RepositoryError::DataCorruption("bad row".to_string()).into()).await;
        assert_eq!(json["error"], INTERNAL);
    }

    #[tokio::test]
    async fn test_client_errors_carry_reason() {
        let json = body(AppError::BadRequest("invalid since".to_string())).await;
        assert_eq!(json["error"], "invalid since");
    }
}
