//! # sage-store
//!
//! Persistence for the sage answer engine.
//!
//! This crate provides:
//! - Connection pool management
//! - pgvector-backed named vector collections ([`PgVectorStore`])
//! - Threads, messages, uploads, summaries, and memories ([`PgConversationStore`])
//! - A filesystem blob store for uploads ([`FilesystemBlobStore`])
//! - In-memory implementations of the same traits ([`memory`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use sage_store::Database;
//! use sage_core::VectorStore;
//!
//! let db = Database::connect("postgres://localhost/sage").await?;
//! let hits = db.vectors.query("global_knowledge", &embedding, 10, None).await?;
//! ```

pub mod blob;
pub mod conversations;
pub mod memory;
pub mod pool;
pub mod vectors;

pub use sage_core::{Error, Result};

pub use blob::FilesystemBlobStore;
pub use conversations::PgConversationStore;
pub use memory::{MemoryConversationStore, MemoryVectorStore};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use vectors::PgVectorStore;

/// Combined database context.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub vectors: PgVectorStore,
    pub conversations: PgConversationStore,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            vectors: PgVectorStore::new(pool.clone()),
            conversations: PgConversationStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
