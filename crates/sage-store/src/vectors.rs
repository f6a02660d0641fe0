//! pgvector-backed vector collections.
//!
//! Each named collection is a row in `vector_collection`; entries live in
//! `vector_entry` keyed by `(collection_id, id)`. Collection ids are cached
//! in-process after first resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use sage_core::{
    DeleteSelector, Error, MetadataFilter, QueryResult, Result, VectorRecord, VectorStore,
};

/// PostgreSQL implementation of [`VectorStore`].
pub struct PgVectorStore {
    pool: Pool<Postgres>,
    handles: RwLock<HashMap<String, Uuid>>,
}

impl PgVectorStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a collection id, creating the collection if needed.
    ///
    /// Concurrent first calls converge on the same id: the insert is
    /// idempotent and the cache is re-checked under the write lock.
    pub async fn get_or_create(&self, name: &str) -> Result<Uuid> {
        if let Some(id) = self.handles.read().await.get(name) {
            return Ok(*id);
        }

        let mut handles = self.handles.write().await;
        if let Some(id) = handles.get(name) {
            return Ok(*id);
        }

        let row = sqlx::query(
            "INSERT INTO vector_collection (id, name) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let id: Uuid = row.get("id");
        debug!(
            subsystem = "store",
            component = "vectors",
            collection = name,
            "Resolved collection handle"
        );
        handles.insert(name.to_string(), id);
        Ok(id)
    }

    /// Look up a collection without creating it.
    async fn lookup(&self, name: &str) -> Result<Option<Uuid>> {
        if let Some(id) = self.handles.read().await.get(name) {
            return Ok(Some(*id));
        }

        let row = sqlx::query("SELECT id FROM vector_collection WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let id: Uuid = row.get("id");
                self.handles.write().await.insert(name.to_string(), id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Drop cached collection handles.
    pub async fn invalidate(&self) {
        self.handles.write().await.clear();
    }
}

fn filter_json(filter: Option<&MetadataFilter>) -> Option<serde_json::Value> {
    filter
        .filter(|f| !f.is_empty())
        .map(|f| serde_json::Value::Object(f.clone()))
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, records), fields(subsystem = "store", component = "vectors", op = "upsert", collection = collection, input_count = records.len()))]
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let collection_id = self.get_or_create(collection).await?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for record in records {
            sqlx::query(
                "INSERT INTO vector_entry (collection_id, id, embedding, document, metadata, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now())
                 ON CONFLICT (collection_id, id) DO UPDATE
                 SET embedding = EXCLUDED.embedding,
                     document = EXCLUDED.document,
                     metadata = EXCLUDED.metadata,
                     updated_at = now()",
            )
            .bind(collection_id)
            .bind(&record.id)
            .bind(Vector::from(record.embedding))
            .bind(&record.document)
            .bind(&record.metadata)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    #[instrument(skip(self, vector, filter), fields(subsystem = "store", component = "vectors", op = "query", collection = collection, k = k))]
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult> {
        let Some(collection_id) = self.lookup(collection).await? else {
            debug!("Collection does not exist; returning empty result");
            return Ok(QueryResult::default());
        };

        let query_vec = Vector::from(vector.to_vec());
        let rows = match filter_json(filter) {
            Some(filter) => {
                sqlx::query(
                    "SELECT id, document, metadata, (embedding <=> $1::vector)::float8 AS distance
                     FROM vector_entry
                     WHERE collection_id = $2 AND metadata @> $4
                     ORDER BY embedding <=> $1::vector
                     LIMIT $3",
                )
                .bind(&query_vec)
                .bind(collection_id)
                .bind(k as i64)
                .bind(filter)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, document, metadata, (embedding <=> $1::vector)::float8 AS distance
                     FROM vector_entry
                     WHERE collection_id = $2
                     ORDER BY embedding <=> $1::vector
                     LIMIT $3",
                )
                .bind(&query_vec)
                .bind(collection_id)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        let mut result = QueryResult::default();
        for row in rows {
            result.ids.push(row.get("id"));
            result.texts.push(row.get("document"));
            result.metadatas.push(row.get("metadata"));
            result.distances.push(row.get::<f64, _>("distance") as f32);
        }
        trace!(result_count = result.len(), "Vector query complete");
        Ok(result)
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<u64> {
        let Some(collection_id) = self.lookup(collection).await? else {
            return Ok(0);
        };

        let done = match selector {
            DeleteSelector::Ids(ids) => {
                sqlx::query("DELETE FROM vector_entry WHERE collection_id = $1 AND id = ANY($2)")
                    .bind(collection_id)
                    .bind(&ids)
                    .execute(&self.pool)
                    .await
            }
            DeleteSelector::Filter(filter) => {
                sqlx::query("DELETE FROM vector_entry WHERE collection_id = $1 AND metadata @> $2")
                    .bind(collection_id)
                    .bind(serde_json::Value::Object(filter))
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(Error::Database)?;

        Ok(done.rows_affected())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let Some(collection_id) = self.lookup(collection).await? else {
            return Ok(0);
        };
        let row = sqlx::query("SELECT COUNT(*) AS n FROM vector_entry WHERE collection_id = $1")
            .bind(collection_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}
