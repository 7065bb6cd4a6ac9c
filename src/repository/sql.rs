//! Postgres implementation of the durable store.

use super::DurableStore;
use crate::error::{EngineError, Result};
use crate::model::{ItemId, ListId, Membership, Role, TodoItem, TodoList, UserId};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;

/// Durable store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct SqlRepository {
    pool: PgPool,
}

impl SqlRepository {
    /// Connect to the durable store.
    ///
    /// When a service key is configured it overrides the password in the
    /// connection URL, matching how the managed database hands out
    /// per-service credentials.
    pub async fn connect(url: &str, service_key: Option<&str>) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(url)
            .map_err(|e| EngineError::Internal(format!("invalid DURABLE_STORE_URL: {}", e)))?;
        if let Some(key) = service_key {
            options = options.password(key);
        }

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// The underlying pool, for schema bootstrap.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_item(&self, item: &TodoItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO todo_items
                (item_id, list_id, name, description, due_date, status, done,
                 media_url, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (item_id) DO UPDATE SET
                name        = EXCLUDED.name,
                description = EXCLUDED.description,
                due_date    = EXCLUDED.due_date,
                status      = EXCLUDED.status,
                done        = EXCLUDED.done,
                media_url   = EXCLUDED.media_url,
                is_deleted  = EXCLUDED.is_deleted,
                updated_at  = EXCLUDED.updated_at
            "#,
        )
        .bind(item.item_id)
        .bind(item.list_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.due_date)
        .bind(item.status.as_str())
        .bind(item.done)
        .bind(&item.media_url)
        .bind(item.is_deleted)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn list_from_row(row: &PgRow) -> Result<TodoList> {
    Ok(TodoList {
        list_id: row.try_get("list_id")?,
        list_name: row.try_get("list_name")?,
        owner_id: row.try_get("owner_id")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<TodoItem> {
    let status: String = row.try_get("status")?;
    Ok(TodoItem {
        item_id: row.try_get("item_id")?,
        list_id: row.try_get("list_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        due_date: row.try_get("due_date")?,
        status: status.parse().map_err(EngineError::Internal)?,
        done: row.try_get("done")?,
        media_url: row.try_get("media_url")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<Membership> {
    let role: String = row.try_get("role")?;
    Ok(Membership {
        list_id: row.try_get("list_id")?,
        user_id: row.try_get("user_id")?,
        role: role.parse().map_err(EngineError::Internal)?,
    })
}

#[async_trait]
impl DurableStore for SqlRepository {
    async fn get_list(&self, list_id: ListId) -> Result<Option<TodoList>> {
        let row = sqlx::query("SELECT * FROM todo_lists WHERE list_id = $1")
            .bind(list_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(list_from_row).transpose()
    }

    async fn get_items(&self, list_id: ListId) -> Result<Vec<TodoItem>> {
        let rows = sqlx::query("SELECT * FROM todo_items WHERE list_id = $1")
            .bind(list_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn get_lists_for_user(&self, user_id: &UserId) -> Result<Vec<TodoList>> {
        let rows = sqlx::query(
            r#"
            SELECT l.*
            FROM todo_lists l
            JOIN todo_list_members m ON m.list_id = l.list_id
            WHERE m.user_id = $1 AND NOT l.is_deleted
            ORDER BY l.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(list_from_row).collect()
    }

    async fn create_list(&self, list: &TodoList) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO todo_lists
                (list_id, list_name, owner_id, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (list_id) DO UPDATE SET
                list_name  = EXCLUDED.list_name,
                is_deleted = EXCLUDED.is_deleted,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(list.list_id)
        .bind(&list.list_name)
        .bind(&list.owner_id)
        .bind(list.is_deleted)
        .bind(list.created_at)
        .bind(list.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO todo_list_members (list_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (list_id, user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(list.list_id)
        .bind(&list.owner_id)
        .bind(Role::Owner.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete_list(&self, list_id: ListId) -> Result<()> {
        sqlx::query("UPDATE todo_lists SET is_deleted = TRUE WHERE list_id = $1")
            .bind(list_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_item(&self, item: &TodoItem) -> Result<()> {
        self.upsert_item(item).await
    }

    async fn update_item(&self, item: &TodoItem) -> Result<()> {
        self.upsert_item(item).await
    }

    async fn soft_delete_item(&self, list_id: ListId, item_id: ItemId) -> Result<()> {
        sqlx::query(
            "UPDATE todo_items SET is_deleted = TRUE WHERE item_id = $1 AND list_id = $2",
        )
        .bind(item_id)
        .bind(list_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_members(&self, list_id: ListId) -> Result<Vec<Membership>> {
        let rows = sqlx::query("SELECT * FROM todo_list_members WHERE list_id = $1")
            .bind(list_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn add_member(&self, list_id: ListId, user_id: &UserId, role: Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO todo_list_members (list_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (list_id, user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(list_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
