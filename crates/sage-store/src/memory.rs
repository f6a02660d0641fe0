//! In-process store implementations for tests and single-node development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use sage_core::{
    cosine_similarity, metadata_matches, ConversationStore, DeleteSelector, Error,
    MetadataFilter, NewMessage, QueryResult, Result, StoredMessage, Thread, UploadDetail,
    VectorRecord, VectorStore,
};

/// Vector collections held in memory, searched by brute-force cosine distance.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();
        for record in records {
            match entries.iter_mut().find(|e| e.id == record.id) {
                Some(existing) => *existing = record,
                None => entries.push(record),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult> {
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(collection) else {
            return Ok(QueryResult::default());
        };

        let mut scored: Vec<(f32, &VectorRecord)> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| metadata_matches(&e.metadata, f)))
            .map(|e| (1.0 - cosine_similarity(vector, &e.embedding), e))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut result = QueryResult::default();
        for (distance, e) in scored {
            result.ids.push(e.id.clone());
            result.texts.push(e.document.clone());
            result.metadatas.push(e.metadata.clone());
            result.distances.push(distance);
        }
        Ok(result)
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(entries) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = entries.len();
        match selector {
            DeleteSelector::Ids(ids) => entries.retain(|e| !ids.contains(&e.id)),
            DeleteSelector::Filter(filter) => {
                entries.retain(|e| !metadata_matches(&e.metadata, &filter))
            }
        }
        Ok((before - entries.len()) as u64)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, |e| e.len() as u64))
    }
}

#[derive(Default)]
struct ThreadState {
    thread: Option<Thread>,
    messages: Vec<StoredMessage>,
    uploads: Vec<UploadDetail>,
    summary: Option<String>,
}

/// Conversation store held in memory.
#[derive(Default)]
pub struct MemoryConversationStore {
    threads: RwLock<HashMap<Uuid, ThreadState>>,
    memories: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a file to a thread (the upload service's job in production).
    pub async fn add_upload(&self, thread_id: Uuid, upload: UploadDetail) -> Result<()> {
        let mut threads = self.threads.write().await;
        let state = threads
            .get_mut(&thread_id)
            .filter(|s| s.thread.is_some())
            .ok_or_else(|| Error::NotFound(format!("thread {}", thread_id)))?;
        state.uploads.push(upload);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<Thread>> {
        Ok(self
            .threads
            .read()
            .await
            .get(&thread_id)
            .and_then(|s| s.thread.clone()))
    }

    async fn create_thread(&self, user_id: &str, title: Option<&str>) -> Result<Thread> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            title: title.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.threads.write().await.insert(
            thread.id,
            ThreadState {
                thread: Some(thread.clone()),
                ..Default::default()
            },
        );
        Ok(thread)
    }

    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let mut threads = self.threads.write().await;
        let state = threads
            .get_mut(&message.thread_id)
            .filter(|s| s.thread.is_some())
            .ok_or_else(|| Error::NotFound(format!("thread {}", message.thread_id)))?;

        let stored = StoredMessage {
            id: Uuid::now_v7(),
            thread_id: message.thread_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            created_at: Utc::now(),
        };
        state.messages.push(stored.clone());
        if let Some(thread) = state.thread.as_mut() {
            thread.updated_at = stored.created_at;
        }
        Ok(stored)
    }

    async fn get_messages(&self, thread_id: Uuid, limit: i64) -> Result<Vec<StoredMessage>> {
        let threads = self.threads.read().await;
        let Some(state) = threads.get(&thread_id) else {
            return Ok(Vec::new());
        };
        let limit = limit.max(0) as usize;
        let skip = state.messages.len().saturating_sub(limit);
        Ok(state.messages[skip..].to_vec())
    }

    async fn count_messages(&self, thread_id: Uuid) -> Result<i64> {
        Ok(self
            .threads
            .read()
            .await
            .get(&thread_id)
            .map_or(0, |s| s.messages.len() as i64))
    }

    async fn get_upload_paths(&self, thread_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .get_upload_details(thread_id)
            .await?
            .into_iter()
            .map(|u| u.path)
            .collect())
    }

    async fn get_upload_details(&self, thread_id: Uuid) -> Result<Vec<UploadDetail>> {
        Ok(self
            .threads
            .read()
            .await
            .get(&thread_id)
            .map(|s| s.uploads.clone())
            .unwrap_or_default())
    }

    async fn get_summary(&self, thread_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .threads
            .read()
            .await
            .get(&thread_id)
            .and_then(|s| s.summary.clone()))
    }

    async fn set_summary(&self, thread_id: Uuid, summary: &str) -> Result<()> {
        let mut threads = self.threads.write().await;
        let state = threads
            .get_mut(&thread_id)
            .filter(|s| s.thread.is_some())
            .ok_or_else(|| Error::NotFound(format!("thread {}", thread_id)))?;
        state.summary = Some(summary.to_string());
        Ok(())
    }

    async fn get_memories(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .memories
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_memories(&self, user_id: &str, memories: &[String]) -> Result<()> {
        let mut all = self.memories.write().await;
        let existing = all.entry(user_id.to_string()).or_default();
        for memory in memories {
            if !existing.contains(memory) {
                existing.push(memory.clone());
            }
        }
        Ok(())
    }
}
