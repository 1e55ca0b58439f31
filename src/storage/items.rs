use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::postgres::{backend, db_span};
use crate::{
    auth::StoreError,
    items::{Item, ItemStore, ItemUpdate, NewItem},
};

/// [`ItemStore`] backed by the `items` table (see `sql/schema.sql`).
#[derive(Clone, Debug)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_from_row(row: &PgRow) -> Result<Item, StoreError> {
    Ok(Item {
        id: row.try_get("id").context("Failed to read items.id")?,
        owner_id: row.try_get("user_id").context("Failed to read items.user_id")?,
        title: row.try_get("title").context("Failed to read items.title")?,
        description: row
            .try_get("description")
            .context("Failed to read items.description")?,
        is_done: row.try_get("is_done").context("Failed to read items.is_done")?,
        created_at: row
            .try_get("created_at")
            .context("Failed to read items.created_at")?,
    })
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn create_item(&self, owner: Uuid, new: NewItem) -> Result<Item, StoreError> {
        let query = "INSERT INTO items (id, user_id, title, description) VALUES ($1, $2, $3, $4) RETURNING id, user_id, title, description, is_done, created_at";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(owner)
            .bind(&new.title)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| backend(err, "Failed to insert item"))?;

        item_from_row(&row)
    }

    async fn list_items(&self, owner: Uuid) -> Result<Vec<Item>, StoreError> {
        let query = "SELECT id, user_id, title, description, is_done, created_at FROM items WHERE user_id = $1 ORDER BY seq";
        let rows = sqlx::query(query)
            .bind(owner)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "Failed to list items"))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn update_item(
        &self,
        owner: Uuid,
        id: Uuid,
        update: ItemUpdate,
    ) -> Result<Option<Item>, StoreError> {
        let query = "UPDATE items SET title = COALESCE($3, title), description = COALESCE($4, description), is_done = COALESCE($5, is_done) WHERE id = $1 AND user_id = $2 RETURNING id, user_id, title, description, is_done, created_at";
        let row = sqlx::query(query)
            .bind(id)
            .bind(owner)
            .bind(update.title)
            .bind(update.description)
            .bind(update.is_done)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(|err| backend(err, "Failed to update item"))?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn delete_item(&self, owner: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let query = "DELETE FROM items WHERE id = $1 AND user_id = $2";
        let result = sqlx::query(query)
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .map_err(|err| backend(err, "Failed to delete item"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_items_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM items WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(owner)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .map_err(|err| backend(err, "Failed to delete items"))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_pool_store_is_constructible() -> anyhow::Result<()> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://itemkeep@localhost:5432/itemkeep")?;
        let store: std::sync::Arc<dyn ItemStore> = std::sync::Arc::new(PgItemStore::new(pool));
        drop(store);
        Ok(())
    }
}
