//! Schema bootstrap for the durable store.
//!
//! Applied idempotently at boot: tables, indexes, and the `updated_at`
//! trigger. Statements run one at a time so a partial failure names the
//! statement that broke.

use crate::error::{EngineError, Result};
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS todo_lists (
        list_id    UUID PRIMARY KEY,
        list_name  TEXT NOT NULL,
        owner_id   TEXT NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS todo_items (
        item_id     UUID PRIMARY KEY,
        list_id     UUID NOT NULL REFERENCES todo_lists (list_id),
        name        TEXT NOT NULL,
        description TEXT,
        due_date    TIMESTAMPTZ,
        status      TEXT NOT NULL DEFAULT 'not_started',
        done        BOOLEAN NOT NULL DEFAULT FALSE,
        media_url   TEXT,
        is_deleted  BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS todo_items_list_idx ON todo_items (list_id)",
    r#"
    CREATE TABLE IF NOT EXISTS todo_list_members (
        list_id UUID NOT NULL REFERENCES todo_lists (list_id),
        user_id TEXT NOT NULL,
        role    TEXT NOT NULL DEFAULT 'viewer',
        PRIMARY KEY (list_id, user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS todo_list_members_user_idx ON todo_list_members (user_id)",
    r#"
    CREATE OR REPLACE FUNCTION tasksync_set_updated_at() RETURNS TRIGGER AS $$
    BEGIN
        NEW.updated_at = now();
        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS todo_lists_updated_at ON todo_lists",
    r#"
    CREATE TRIGGER todo_lists_updated_at
        BEFORE UPDATE ON todo_lists
        FOR EACH ROW EXECUTE FUNCTION tasksync_set_updated_at()
    "#,
    "DROP TRIGGER IF EXISTS todo_items_updated_at ON todo_items",
    r#"
    CREATE TRIGGER todo_items_updated_at
        BEFORE UPDATE ON todo_items
        FOR EACH ROW EXECUTE FUNCTION tasksync_set_updated_at()
    "#,
];

/// Create tables, indexes, and triggers if they do not exist yet.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            EngineError::Internal(format!(
                "schema bootstrap failed on {:?}...: {}",
                statement.trim().lines().next().unwrap_or(""),
                e
            ))
        })?;
    }
    log::info!("durable store schema verified ({} statements)", STATEMENTS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_cover_all_tables() {
        let all = STATEMENTS.join("\n");
        assert!(all.contains("todo_lists"));
        assert!(all.contains("todo_items"));
        assert!(all.contains("todo_list_members"));
        assert!(all.contains("updated_at"));
    }

    #[test]
    fn test_statements_are_idempotent_forms() {
        for statement in STATEMENTS {
            let normalized = statement.trim().to_uppercase();
            assert!(
                normalized.starts_with("CREATE TABLE IF NOT EXISTS")
                    || normalized.starts_with("CREATE INDEX IF NOT EXISTS")
                    || normalized.starts_with("CREATE OR REPLACE FUNCTION")
                    || normalized.starts_with("DROP TRIGGER IF EXISTS")
                    || normalized.starts_with("CREATE TRIGGER"),
                "non-idempotent statement: {statement}"
            );
        }
    }
}
