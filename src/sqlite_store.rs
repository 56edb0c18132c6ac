//! SQLite-backed [`ChunkStore`] implementation.
//!
//! Documents, chunks, and embedding vectors live in three tables, all
//! carrying a `workspace_id` column; every query here filters on it.
//! Vectors are stored as little-endian f32 BLOBs. Similarity ranking is
//! done in process over the workspace's candidate rows — corpora are
//! bounded per workspace, so exact scoring is cheap and deterministic.
//!
//! Corpus replacement runs a single transaction (delete + insert), which
//! gives readers the old corpus or the new one, never a mix.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use docvault_core::embedding::{blob_to_vec, vec_to_blob};
use docvault_core::models::{
    Chunk, ClassificationLabel, Document, DocumentMetadata, RetrievalResult,
};
use docvault_core::rank::rank_chunks;
use docvault_core::store::ChunkStore;
use docvault_core::{Error, Result};

/// SQLite implementation of the [`ChunkStore`] trait.
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        workspace_id: row.get("workspace_id"),
        content: row.get("content"),
        start_char: row.get("start_char"),
        end_char: row.get("end_char"),
        chunk_index: row.get("chunk_index"),
        source_title: row.get("source_title"),
        source_url: row.get("source_url"),
    }
}

fn metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentMetadata> {
    let label_str: String = row.get("classification_label");
    let classification_label = ClassificationLabel::from_str(&label_str).map_err(|_| {
        Error::integrity(format!(
            "document carries an unknown classification label: '{}'",
            label_str
        ))
    })?;
    let accessed_at: Option<String> = row.get("accessed_at");
    Ok(DocumentMetadata {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        license: row.get("license"),
        accessed_at: accessed_at.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        classification_label,
    })
}

async fn insert_batch(
    conn: &mut SqliteConnection,
    documents: &[Document],
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(Error::validation(
            "Chunks and embeddings must be the same length.",
        ));
    }

    let now = chrono::Utc::now().timestamp();
    for doc in documents {
        let workspace_id = doc
            .workspace_id
            .as_deref()
            .ok_or_else(|| Error::validation("Document is missing a workspace id."))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, workspace_id, title, source_url, license,
                                   accessed_at, text, classification_label, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(workspace_id)
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.license)
        .bind(doc.accessed_at.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(&doc.text)
        .bind(doc.classification.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
    }

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, workspace_id, chunk_index,
                                start_char, end_char, content, source_title, source_url)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.workspace_id)
        .bind(chunk.chunk_index)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(&chunk.content)
        .bind(&chunk.source_title)
        .bind(&chunk.source_url)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, workspace_id, embedding) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.workspace_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
    }

    Ok(())
}

async fn delete_workspace_rows(conn: &mut SqliteConnection, workspace_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
    sqlx::query("DELETE FROM chunks WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
    sqlx::query("DELETE FROM documents WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
    Ok(())
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn add_many(
        &self,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        insert_batch(&mut *tx, documents, chunks, vectors).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn replace_workspace(
        &self,
        workspace_id: &str,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        delete_workspace_rows(&mut *tx, workspace_id).await?;
        insert_batch(&mut *tx, documents, chunks, vectors).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn search(
        &self,
        workspace_id: &str,
        query_vector: &[f32],
        top_k: usize,
        allowed_labels: Option<&BTreeSet<ClassificationLabel>>,
    ) -> Result<Vec<RetrievalResult>> {
        let mut sql = String::from(
            r#"
            SELECT c.id, c.document_id, c.workspace_id, c.chunk_index,
                   c.start_char, c.end_char, c.content, c.source_title, c.source_url,
                   v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE c.workspace_id = ?
            "#,
        );
        if let Some(allowed) = allowed_labels {
            let placeholders = vec!["?"; allowed.len().max(1)].join(", ");
            sql.push_str(&format!(
                "AND c.document_id IN (SELECT id FROM documents WHERE workspace_id = ? \
                 AND classification_label IN ({}))",
                placeholders
            ));
        }
        sql.push_str(" ORDER BY c.rowid ASC");

        let mut query = sqlx::query(&sql).bind(workspace_id);
        if let Some(allowed) = allowed_labels {
            query = query.bind(workspace_id);
            if allowed.is_empty() {
                query = query.bind("");
            }
            for label in allowed {
                query = query.bind(label.as_str());
            }
        }

        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut chunks = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            chunks.push(chunk_from_row(row));
            let blob: Vec<u8> = row.get("embedding");
            vectors.push(blob_to_vec(&blob));
        }

        Ok(rank_chunks(&chunks, &vectors, query_vector, top_k))
    }

    async fn has_data(&self, workspace_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chunks WHERE workspace_id = ?)")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(exists)
    }

    async fn list_documents(
        &self,
        workspace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workspace_id, title, source_url, license, accessed_at,
                   classification_label
            FROM documents
            WHERE workspace_id = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(workspace_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(metadata_from_row).collect()
    }

    async fn list_chunks(&self, workspace_id: &str, limit: usize) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, workspace_id, chunk_index, start_char, end_char,
                   content, source_title, source_url
            FROM chunks
            WHERE workspace_id = ?
            ORDER BY rowid ASC
            LIMIT ?
            "#,
        )
        .bind(workspace_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn classification_map(
        &self,
        workspace_id: &str,
        document_ids: &[String],
    ) -> Result<HashMap<String, ClassificationLabel>> {
        // Malformed ids can never match a row; skip them without touching
        // the database.
        let valid_ids: Vec<&String> = document_ids
            .iter()
            .filter(|id| Uuid::parse_str(id).is_ok())
            .collect();
        if valid_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; valid_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, classification_label FROM documents \
             WHERE workspace_id = ? AND id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(workspace_id);
        for id in &valid_ids {
            query = query.bind(id.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut map = HashMap::new();
        for row in &rows {
            let id: String = row.get("id");
            let label_str: String = row.get("classification_label");
            // Unparsable labels are left out; the pipeline counts the
            // chunk as missing metadata instead of guessing.
            if let Ok(label) = ClassificationLabel::from_str(&label_str) {
                map.insert(id, label);
            }
        }
        Ok(map)
    }

    async fn update_classification(
        &self,
        workspace_id: &str,
        document_id: &str,
        label: ClassificationLabel,
    ) -> Result<Option<DocumentMetadata>> {
        let result = sqlx::query(
            "UPDATE documents SET classification_label = ? WHERE id = ? AND workspace_id = ?",
        )
        .bind(label.as_str())
        .bind(document_id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT id, workspace_id, title, source_url, license, accessed_at,
                   classification_label
            FROM documents
            WHERE id = ? AND workspace_id = ?
            "#,
        )
        .bind(document_id)
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        metadata_from_row(&row).map(Some)
    }

    async fn clear_workspace(&self, workspace_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        delete_workspace_rows(&mut *tx, workspace_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }
}
