//! Current user.

use axum::Json;

use crate::middleware::CurrentUser;
use crate::models::User;

/// The authenticated user, with the admin flag as of this request.
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
