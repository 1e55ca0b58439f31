use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{
    normalize_email,
    types::{TokenResponse, UpdateUserRequest},
    valid_email,
};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        extract::Authenticated,
    },
    auth::{AuthError, ProfileUpdate, SessionAuthenticator},
    items::ItemStore,
};

// Empty strings mean "leave unchanged"; whitespace-only values are rejected.
fn non_empty(value: Option<String>, field: &str) -> Result<Option<String>, ApiError> {
    match value {
        Some(value) if value.is_empty() => Ok(None),
        Some(value) if value.trim().is_empty() => {
            Err(ApiError::BadRequest(format!("{field} must not be blank")))
        }
        value => Ok(value),
    }
}

#[utoipa::path(
    put,
    path= "/user/modify",
    request_body = UpdateUserRequest,
    responses (
        (status = 200, description = "Profile updated; a new password revokes older tokens", body = TokenResponse),
        (status = 400, description = "Invalid input or email already registered", body = ErrorResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 409, description = "Credentials changed concurrently", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "user"
)]
#[instrument(skip(authenticator, identity, request), fields(user_id = %identity.id))]
pub async fn modify_user(
    Extension(authenticator): Extension<Arc<SessionAuthenticator>>,
    Authenticated(identity): Authenticated,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let username =
        non_empty(request.username, "Username")?.map(|username| username.trim().to_string());
    let email = non_empty(request.email, "Email")?.map(|email| normalize_email(&email));
    let password = non_empty(request.password, "Password")?;

    if email.as_deref().is_some_and(|email| !valid_email(email)) {
        return Err(ApiError::BadRequest("Invalid email".to_string()));
    }

    if username.is_some() || email.is_some() {
        authenticator
            .store()
            .update_profile(identity.id, ProfileUpdate { username, email })
            .await
            .map_err(AuthError::from)?;
        info!("Profile updated");
    }

    let token = match password {
        Some(password) => authenticator.update_credentials(identity, &password).await?,
        None => authenticator.issue(identity)?,
    };

    Ok(Json(token.into()))
}

#[utoipa::path(
    delete,
    path= "/user/delete",
    responses (
        (status = 200, description = "Account and its items deleted"),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "user"
)]
#[instrument(skip(authenticator, items, identity), fields(user_id = %identity.id))]
pub async fn delete_user(
    Extension(authenticator): Extension<Arc<SessionAuthenticator>>,
    Extension(items): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
) -> Result<StatusCode, ApiError> {
    let purged = items
        .delete_items_for_owner(identity.id)
        .await
        .map_err(AuthError::from)?;

    let deleted = authenticator
        .store()
        .delete_identity(identity.id)
        .await
        .map_err(AuthError::from)?;

    if !deleted {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    info!(purged, "Account deleted");
    Ok(StatusCode::OK)
}
