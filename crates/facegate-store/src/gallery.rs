//! SQLite-backed face gallery.

use crate::{Result, StoreError};
use chrono::{SecondsFormat, Utc};
use facegate_core::{Embedding, FaceRecord, GalleryError, GalleryStore};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    image_reference TEXT    NOT NULL UNIQUE,
    embedding       TEXT    NOT NULL,
    model_version   TEXT,
    created_at      TEXT    NOT NULL
);
";

/// Append-only gallery in a single SQLite database file.
pub struct SqliteGallery {
    conn: Mutex<Connection>,
}

impl SqliteGallery {
    /// Open or create the gallery at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "opened face gallery");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory gallery; contents vanish on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, image_reference: &str, embedding: &Embedding) -> std::result::Result<FaceRecord, GalleryError> {
        let encoded = serde_json::to_string(&embedding.values).map_err(StoreError::from)?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO faces (image_reference, embedding, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![image_reference, encoded, embedding.model_version, created_at],
        );

        match inserted {
            Ok(_) => Ok(FaceRecord {
                id: conn.last_insert_rowid(),
                image_reference: image_reference.to_string(),
                embedding: embedding.clone(),
                created_at,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                Err(GalleryError::DuplicateReference(image_reference.to_string()))
            }
            Err(err) => Err(StoreError::from(err).into()),
        }
    }

    fn load_all(&self) -> Result<Vec<FaceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, image_reference, embedding, model_version, created_at
             FROM faces ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, image_reference, raw, model_version, created_at) = row?;
            let values: Vec<f32> = match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(id, image_reference = %image_reference, error = %err, "skipping face with undecodable embedding");
                    continue;
                }
            };
            records.push(FaceRecord {
                id,
                image_reference,
                embedding: Embedding { values, model_version },
                created_at,
            });
        }
        Ok(records)
    }

    fn row_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl GalleryStore for SqliteGallery {
    fn append(&self, image_reference: &str, embedding: &Embedding) -> std::result::Result<FaceRecord, GalleryError> {
        self.insert(image_reference, embedding)
    }

    fn all(&self) -> std::result::Result<Vec<FaceRecord>, GalleryError> {
        Ok(self.load_all()?)
    }

    fn count(&self) -> std::result::Result<usize, GalleryError> {
        Ok(self.row_count()?)
    }
}
