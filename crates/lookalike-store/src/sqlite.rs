//! SQLite-backed known-face store.
//!
//! Embeddings are stored as little-endian `f32` blobs. Rows are returned in
//! insertion order so matching ties resolve the same way across restarts.

use crate::StoreError;
use lookalike_core::{is_reserved_label, Embedding, KnownFace};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS known_faces (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT    NOT NULL UNIQUE,
    label         TEXT    NOT NULL,
    embedding     BLOB    NOT NULL,
    dimensions    INTEGER NOT NULL,
    model_version TEXT,
    created_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS known_faces_label ON known_faces(label);
";

/// Metadata of a stored face, without the vector.
#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub id: String,
    pub label: String,
    pub dimensions: usize,
    pub model_version: Option<String>,
    pub created_at: String,
}

enum InsertOutcome {
    Inserted { duplicate_label: bool },
    DimensionMismatch { expected: usize },
}

/// Handle to the known-face database. Calls run on a dedicated
/// connection thread.
pub struct FaceStore {
    conn: tokio_rusqlite::Connection,
}

impl FaceStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "face store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Every known face, in insertion order.
    pub async fn snapshot(&self) -> Result<Vec<KnownFace>, StoreError> {
        let faces = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, label, embedding, model_version, created_at
                     FROM known_faces ORDER BY seq",
                )?;
                let rows = stmt.query_map([], |row| {
                    let blob: Vec<u8> = row.get(2)?;
                    Ok(KnownFace {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        embedding: Embedding {
                            values: decode_embedding(2, &blob)?,
                            model_version: row.get(3)?,
                        },
                        created_at: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(faces)
    }

    /// Store a new sample for `label`.
    ///
    /// A label may be enrolled several times; each call adds a sample.
    /// All stored embeddings must share one length.
    pub async fn insert(&self, label: &str, embedding: Embedding) -> Result<KnownFace, StoreError> {
        if is_reserved_label(label) {
            return Err(StoreError::ReservedLabel(label.to_string()));
        }
        let face = KnownFace {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            embedding,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let row = face.clone();
        let actual = face.embedding.dimensions();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stored_dims: Option<usize> = tx
                    .query_row("SELECT dimensions FROM known_faces LIMIT 1", [], |r| r.get(0))
                    .optional()?;
                if let Some(expected) = stored_dims.filter(|&d| d != actual) {
                    return Ok(InsertOutcome::DimensionMismatch { expected });
                }

                let duplicate_label: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM known_faces WHERE label = ?1)",
                    params![row.label],
                    |r| r.get(0),
                )?;
                tx.execute(
                    "INSERT INTO known_faces (id, label, embedding, dimensions, model_version, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id,
                        row.label,
                        encode_embedding(&row.embedding.values),
                        actual,
                        row.embedding.model_version,
                        row.created_at,
                    ],
                )?;
                tx.commit()?;
                Ok(InsertOutcome::Inserted { duplicate_label })
            })
            .await?;

        match outcome {
            InsertOutcome::DimensionMismatch { expected } => {
                Err(StoreError::DimensionMismatch { expected, actual })
            }
            InsertOutcome::Inserted { duplicate_label } => {
                if duplicate_label {
                    tracing::warn!(
                        label = %face.label,
                        "label already enrolled; adding as additional sample"
                    );
                }
                tracing::info!(
                    id = %face.id,
                    label = %face.label,
                    dimensions = actual,
                    "face stored"
                );
                Ok(face)
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<FaceSummary>, StoreError> {
        let faces = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, label, dimensions, model_version, created_at
                     FROM known_faces ORDER BY seq",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(FaceSummary {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        dimensions: row.get(2)?,
                        model_version: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(faces)
    }

    /// Delete one sample by id. Returns whether a row was removed.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM known_faces WHERE id = ?1", params![id])?)
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let n: usize =
                    conn.query_row("SELECT COUNT(*) FROM known_faces", [], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(count)
    }
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(column: usize, blob: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Blob,
            format!("embedding blob length {} is not a multiple of 4", blob.len()).into(),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
