//! Request/response types for the account and item endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{auth::SessionToken, items::Item};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// OAuth2 password-grant form; `username` is the account email.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl From<SessionToken> for TokenResponse {
    fn from(token: SessionToken) -> Self {
        Self {
            access_token: token.access_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateItemRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// `id` is the item's position in the caller's list; empty strings keep the
/// current value.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct UpdateItemRequest {
    pub id: usize,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_done: Option<bool>,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct DeleteItemQuery {
    /// Position of the item in the caller's list.
    #[serde(default)]
    pub id: usize,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ItemResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub is_done: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Item> for ItemResponse {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            user_id: item.owner_id,
            title: item.title,
            description: item.description,
            is_done: item.is_done,
            created_at: item.created_at,
        }
    }
}
