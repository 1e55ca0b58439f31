//! Per-user item collection.
//!
//! Every [`ItemStore`] operation takes the owner's id and never touches items
//! owned by anyone else. Listings come back in creation order; the HTTP layer
//! addresses items by their position in that list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::StoreError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub is_done: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewItem {
    pub title: String,
    pub description: String,
}

/// `None` fields are left unchanged.
#[derive(Clone, Debug, Default)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_done: Option<bool>,
}

impl ItemUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_done.is_none()
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create_item(&self, owner: Uuid, new: NewItem) -> Result<Item, StoreError>;

    /// The owner's items, oldest first.
    async fn list_items(&self, owner: Uuid) -> Result<Vec<Item>, StoreError>;

    /// Returns `None` when `owner` has no item with that id.
    async fn update_item(
        &self,
        owner: Uuid,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<Option<Item>, StoreError>;

    /// Returns `false` when `owner` has no item with that id.
    async fn delete_item(&self, owner: Uuid, id: Uuid) -> Result<bool, StoreError>;

    /// Drop every item of `owner`, returning how many were removed.
    async fn delete_items_for_owner(&self, owner: Uuid) -> Result<u64, StoreError>;
}

/// Process-local store used by tests and single-node dev runs.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<Uuid, Vec<Item>>>,
}

impl MemoryItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn create_item(&self, owner: Uuid, new: NewItem) -> Result<Item, StoreError> {
        let item = Item {
            id: Uuid::new_v4(),
            owner_id: owner,
            title: new.title,
            description: new.description,
            is_done: false,
            created_at: Utc::now(),
        };
        self.items.lock().entry(owner).or_default().push(item.clone());
        Ok(item)
    }

    async fn list_items(&self, owner: Uuid) -> Result<Vec<Item>, StoreError> {
        Ok(self.items.lock().get(&owner).cloned().unwrap_or_default())
    }

    async fn update_item(
        &self,
        owner: Uuid,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<Option<Item>, StoreError> {
        let mut items = self.items.lock();
        let Some(item) = items
            .get_mut(&owner)
            .and_then(|owned| owned.iter_mut().find(|item| item.id == id))
        else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            item.title = title;
        }
        if let Some(description) = update.description {
            item.description = description;
        }
        if let Some(is_done) = update.is_done {
            item.is_done = is_done;
        }
        Ok(Some(item.clone()))
    }

    async fn delete_item(&self, owner: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut items = self.items.lock();
        let Some(owned) = items.get_mut(&owner) else {
            return Ok(false);
        };
        let before = owned.len();
        owned.retain(|item| item.id != id);
        Ok(owned.len() < before)
    }

    async fn delete_items_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let removed = self.items.lock().remove(&owner).map_or(0, |owned| owned.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}
