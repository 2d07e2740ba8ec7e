//! SQLite-backed [`VectorIndex`].
//!
//! Each segment is one row: id, text, string metadata (as JSON) and the
//! embedding as a little-endian f32 BLOB. Batches are written in a single
//! transaction, so a failed ingestion leaves no partial rows. Search is
//! brute-force cosine similarity over all rows, which is adequate for a
//! personal knowledge base.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use kb_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use kb_harness_core::index::{check_batch, rank, IndexError, IndexMatch, Payload, VectorIndex};

use crate::db;

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Open the index at `path`, creating the file and schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn write_err(e: impl std::fmt::Display) -> IndexError {
    IndexError::Write(e.to_string())
}

fn read_err(e: impl std::fmt::Display) -> IndexError {
    IndexError::Read(e.to_string())
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn add_all(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Payload],
    ) -> Result<(), IndexError> {
        check_batch(ids, vectors, payloads)?;
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let existing: Option<i64> = sqlx::query_scalar("SELECT dims FROM segments LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        if let Some(dims) = existing {
            if dims as usize != first.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: dims as usize,
                    actual: first.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await.map_err(write_err)?;
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            let metadata_json = serde_json::to_string(&payload.metadata).map_err(write_err)?;
            sqlx::query(
                r#"
                INSERT INTO segments (id, text, metadata_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(id)
            .bind(&payload.text)
            .bind(&metadata_json)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id, text, metadata_json, embedding FROM segments")
            .fetch_all(&self.pool)
            .await
            .map_err(read_err)?;

        let mut matches = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query, &blob_to_vec(&blob));
            if score < min_score {
                continue;
            }
            let metadata_json: String = row.get("metadata_json");
            // A corrupt metadata column still yields the text, just unscoped.
            let metadata: BTreeMap<String, String> =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            matches.push(IndexMatch {
                id: row.get("id"),
                score,
                payload: Payload {
                    text: row.get("text"),
                    metadata,
                },
            });
        }
        rank(&mut matches, max_results);
        Ok(matches)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM segments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(write_err)?;
        Ok(removed as usize)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segments")
            .fetch_one(&self.pool)
            .await
            .map_err(read_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload(text: &str, collection: &str) -> Payload {
        let mut metadata = BTreeMap::new();
        metadata.insert("collection_id".to_string(), collection.to_string());
        Payload {
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.sqlite");
        {
            let index = SqliteVectorIndex::open(&path).await.unwrap();
            index
                .add_all(
                    &["s1".into(), "s2".into()],
                    &[vec![1.0, 0.0], vec![0.0, 1.0]],
                    &[payload("first", "c1"), payload("second", "c2")],
                )
                .await
                .unwrap();
            index.close().await;
        }
        let index = SqliteVectorIndex::open(&path).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);
        let hits = index.search(&[1.0, 0.1], 1, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text, "first");
        assert_eq!(hits[0].payload.get("collection_id"), Some("c1"));
    }

    #[tokio::test]
    async fn min_score_and_remove() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteVectorIndex::open(&tmp.path().join("v.sqlite"))
            .await
            .unwrap();
        index
            .add_all(
                &["a".into(), "b".into()],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[payload("a", "c"), payload("b", "c")],
            )
            .await
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 10, 0.2).await.unwrap();
        assert_eq!(hits.len(), 1);

        assert_eq!(index.remove(&["a".into(), "zzz".into()]).await.unwrap(), 1);
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteVectorIndex::open(&tmp.path().join("v.sqlite"))
            .await
            .unwrap();
        index
            .add_all(&["a".into()], &[vec![1.0, 0.0]], &[payload("a", "c")])
            .await
            .unwrap();
        let err = index
            .add_all(
                &["b".into(), "c".into()],
                &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]],
                &[payload("b", "c"), payload("c", "c")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len().await.unwrap(), 1);
    }
}
