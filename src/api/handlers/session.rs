use axum::{Extension, Form, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    normalize_email,
    types::{LoginForm, RegisterRequest, TokenResponse},
    valid_email,
};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        extract::Authenticated,
    },
    auth::SessionAuthenticator,
};

#[utoipa::path(
    post,
    path= "/register",
    request_body = RegisterRequest,
    responses (
        (status = 200, description = "Account created, token issued", body = TokenResponse),
        (status = 400, description = "Email already registered or invalid input", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(authenticator, request), fields(email = %request.email))]
pub async fn register(
    Extension(authenticator): Extension<Arc<SessionAuthenticator>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email".to_string()));
    }

    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if request.password.trim().is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }

    let token = authenticator
        .register(username, &email, &request.password)
        .await?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    post,
    path= "/token",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Credentials accepted", body = TokenResponse),
        (status = 401, description = "Could not validate user", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(authenticator, form))]
pub async fn token(
    Extension(authenticator): Extension<Arc<SessionAuthenticator>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let username = normalize_email(&form.username);
    let token = authenticator.login(&username, &form.password).await?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    get,
    path= "/login",
    responses (
        (status = 200, description = "Fresh token for the current session", body = TokenResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip(authenticator, identity), fields(user_id = %identity.id))]
pub async fn login(
    Extension(authenticator): Extension<Arc<SessionAuthenticator>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = authenticator.issue(identity)?;
    Ok(Json(token.into()))
}
