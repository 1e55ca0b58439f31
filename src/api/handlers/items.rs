use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::types::{CreateItemRequest, DeleteItemQuery, ItemResponse, UpdateItemRequest};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        extract::Authenticated,
    },
    auth::AuthError,
    items::{Item, ItemStore, ItemUpdate, NewItem},
};

/// Resolve a position in the caller's list to the stored item.
async fn item_at(store: &dyn ItemStore, owner: Uuid, index: usize) -> Result<Item, ApiError> {
    let mut items = store.list_items(owner).await.map_err(AuthError::from)?;
    let len = items.len();
    if index >= len {
        return Err(ApiError::NotFound(format!(
            "Item index {index} out of bounds for length {len}."
        )));
    }
    Ok(items.swap_remove(index))
}

// Empty strings mean "leave unchanged".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path= "/items",
    request_body = CreateItemRequest,
    responses (
        (status = 200, description = "Item created", body = ItemResponse),
        (status = 400, description = "Title is required", body = ErrorResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "items"
)]
#[instrument(skip(store, identity, request), fields(user_id = %identity.id))]
pub async fn create_item(
    Extension(store): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
    Json(request): Json<CreateItemRequest>,
) -> Result<Json<ItemResponse>, ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }

    let item = store
        .create_item(
            identity.id,
            NewItem {
                title: title.to_string(),
                description: request.description,
            },
        )
        .await
        .map_err(AuthError::from)?;

    info!(item_id = %item.id, "Item created");
    Ok(Json(item.into()))
}

#[utoipa::path(
    get,
    path= "/items",
    responses (
        (status = 200, description = "The caller's items in creation order", body = [ItemResponse]),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "items"
)]
#[instrument(skip(store, identity), fields(user_id = %identity.id))]
pub async fn list_items(
    Extension(store): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Vec<ItemResponse>>, ApiError> {
    let items = store.list_items(identity.id).await.map_err(AuthError::from)?;
    Ok(Json(items.into_iter().map(ItemResponse::from).collect()))
}

#[utoipa::path(
    get,
    path= "/items/{item_id}",
    params(
        ("item_id" = usize, Path, description = "Position of the item in the caller's list"),
    ),
    responses (
        (status = 200, description = "The item at that position", body = ItemResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 404, description = "Index out of bounds", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "items"
)]
#[instrument(skip(store, identity), fields(user_id = %identity.id))]
pub async fn get_item(
    Extension(store): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
    Path(item_id): Path<usize>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = item_at(store.as_ref(), identity.id, item_id).await?;
    Ok(Json(item.into()))
}

#[utoipa::path(
    put,
    path= "/items/modify",
    request_body = UpdateItemRequest,
    responses (
        (status = 200, description = "Item updated", body = ItemResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 404, description = "Index out of bounds or item gone", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "items"
)]
#[instrument(skip(store, identity, request), fields(user_id = %identity.id, index = request.id))]
pub async fn modify_item(
    Extension(store): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = item_at(store.as_ref(), identity.id, request.id).await?;

    let update = ItemUpdate {
        title: non_empty(request.title),
        description: non_empty(request.description),
        is_done: request.is_done,
    };
    if update.is_empty() {
        return Ok(Json(item.into()));
    }

    let updated = store
        .update_item(identity.id, item.id, update)
        .await
        .map_err(AuthError::from)?
        .ok_or_else(|| ApiError::NotFound("Item not found".to_string()))?;

    info!(item_id = %updated.id, "Item updated");
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path= "/items/delete",
    params(DeleteItemQuery),
    responses (
        (status = 200, description = "Item deleted"),
        (status = 401, description = "Missing, invalid, expired or revoked token", body = ErrorResponse),
        (status = 404, description = "Index out of bounds or item gone", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "items"
)]
#[instrument(skip(store, identity), fields(user_id = %identity.id))]
pub async fn delete_item(
    Extension(store): Extension<Arc<dyn ItemStore>>,
    Authenticated(identity): Authenticated,
    Query(query): Query<DeleteItemQuery>,
) -> Result<StatusCode, ApiError> {
    let item = item_at(store.as_ref(), identity.id, query.id).await?;

    let deleted = store
        .delete_item(identity.id, item.id)
        .await
        .map_err(AuthError::from)?;
    if !deleted {
        return Err(ApiError::NotFound("Item not found".to_string()));
    }

    info!(item_id = %item.id, "Item deleted");
    Ok(StatusCode::OK)
}
