//! Single-slot template persistence.
//!
//! Exactly one identity can be enrolled. Enrolling again overwrites it;
//! only an explicit clear removes it.

use meshid_core::FeatureVector;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// Well-known slot the enrolled template lives under.
pub const TEMPLATE_SLOT: &str = "enrolled-face";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("refusing to enroll an empty template")]
    EmptyTemplate,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt template: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("cannot create store directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
}

pub trait TemplateStore: Send {
    /// Replace the enrolled template.
    fn enroll(&mut self, vector: &FeatureVector) -> Result<(), StoreError>;
    /// The enrolled template, if any.
    fn load(&self) -> Result<Option<FeatureVector>, StoreError>;
    /// Remove the enrolled template. Returns whether one existed.
    fn clear(&mut self) -> Result<bool, StoreError>;
}

/// SQLite-backed store, one row keyed by [`TEMPLATE_SLOT`].
pub struct SqliteTemplateStore {
    conn: Connection,
}

impl SqliteTemplateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "template store opened");
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS templates (
                slot        TEXT PRIMARY KEY,
                vector      TEXT NOT NULL,
                dimension   INTEGER NOT NULL,
                enrolled_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn enroll(&mut self, vector: &FeatureVector) -> Result<(), StoreError> {
        if vector.is_empty() {
            return Err(StoreError::EmptyTemplate);
        }
        let encoded = serde_json::to_string(vector)?;
        let enrolled_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO templates (slot, vector, dimension, enrolled_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                vector = excluded.vector,
                dimension = excluded.dimension,
                enrolled_at = excluded.enrolled_at",
            params![TEMPLATE_SLOT, encoded, vector.dim() as i64, enrolled_at],
        )?;
        tracing::debug!(dimension = vector.dim(), %enrolled_at, "template written");
        Ok(())
    }

    fn load(&self) -> Result<Option<FeatureVector>, StoreError> {
        let encoded: Option<String> = self
            .conn
            .query_row(
                "SELECT vector FROM templates WHERE slot = ?1",
                params![TEMPLATE_SLOT],
                |row| row.get(0),
            )
            .optional()?;

        match encoded {
            Some(json) => {
                let vector: FeatureVector = serde_json::from_str(&json)?;
                // An empty stored list is treated as absent, never as a template.
                Ok(Some(vector).filter(|v| !v.is_empty()))
            }
            None => Ok(None),
        }
    }

    fn clear(&mut self) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM templates WHERE slot = ?1", params![TEMPLATE_SLOT])?;
        Ok(removed > 0)
    }
}

/// Process-local store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    slot: Option<FeatureVector>,
}

#[cfg(test)]
impl TemplateStore for MemoryTemplateStore {
    fn enroll(&mut self, vector: &FeatureVector) -> Result<(), StoreError> {
        if vector.is_empty() {
            return Err(StoreError::EmptyTemplate);
        }
        self.slot = Some(vector.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<FeatureVector>, StoreError> {
        Ok(self.slot.clone())
    }

    fn clear(&mut self) -> Result<bool, StoreError> {
        Ok(self.slot.take().is_some())
    }
}
