use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

use crate::error::StoreError;
use crate::models::{Slot, SlotRow};
use crate::store::SlotStore;

/// Slot store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteSlotStore {
    pool: SqlitePool,
}

impl SqliteSlotStore {
    /// Connect to an existing database. A missing file is a connection error.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::open(url, false).await
    }

    /// Connect, creating the database file when it does not exist yet.
    pub async fn connect_or_create(url: &str) -> Result<Self, StoreError> {
        Self::open(url, true).await
    }

    async fn open(url: &str, create_if_missing: bool) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Connection)?
            .create_if_missing(create_if_missing);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(StoreError::Connection)?;

        tracing::info!("Database connection established.");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        create_slots_table(&self.pool).await?;
        Ok(())
    }

    pub async fn insert_slot(&self, slot: &Slot) -> Result<(), StoreError> {
        insert_slot(&self.pool, slot).await?;
        Ok(())
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn find_all(&self) -> Result<Vec<Slot>, StoreError> {
        get_all_slots(&self.pool)
            .await?
            .iter()
            .map(SlotRow::to_slot)
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let removed = delete_slot(&self.pool, id).await?;
        if removed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

// No unique index on code: duplicates are possible and repaired by the resolver
pub async fn create_slots_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS slots (
               id TEXT PRIMARY KEY NOT NULL,
               code TEXT NOT NULL,
               name TEXT NOT NULL,
               min_select INTEGER NOT NULL DEFAULT 4,
               max_select INTEGER NOT NULL DEFAULT 4,
               description TEXT,
               requirements TEXT,
               created_at TEXT NOT NULL,
               updated_at TEXT NOT NULL
           )"#
    )
    .execute(pool)
    .await?;

    Ok(())
}

// Slot queries
pub async fn get_all_slots(pool: &SqlitePool) -> Result<Vec<SlotRow>, sqlx::Error> {
    sqlx::query_as::<_, SlotRow>(
        r#"SELECT id, code, name, min_select, max_select, description, requirements,
                  created_at, updated_at
           FROM slots"#
    )
    .fetch_all(pool)
    .await
}

pub async fn insert_slot(pool: &SqlitePool, slot: &Slot) -> Result<(), sqlx::Error> {
    let requirements = slot.requirements.as_ref().map(|r| r.to_string());

    sqlx::query(
        r#"INSERT INTO slots (id, code, name, min_select, max_select, description, requirements,
                               created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&slot.id)
    .bind(&slot.code)
    .bind(&slot.name)
    .bind(slot.min_select)
    .bind(slot.max_select)
    .bind(&slot.description)
    .bind(requirements)
    .bind(slot.created_at.to_rfc3339())
    .bind(slot.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns the number of rows removed
pub async fn delete_slot(pool: &SqlitePool, id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM slots WHERE id = ?"#)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
