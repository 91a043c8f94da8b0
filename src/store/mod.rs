//! Transactional persistence layer.
//!
//! The store exclusively owns every table; services reach Postgres only
//! through it. Catalogue writes run inside a transaction that holds a
//! per-name advisory lock, so publishes of the same name serialize across
//! connections while distinct names proceed in parallel.

mod catalog;
mod cursor;
mod deployments;
mod embeddings;
mod readmes;
mod registries;

pub use catalog::{VersionFilter, VersionPage};
pub use cursor::Cursor;
pub use embeddings::EmbeddingMetadata;

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use crate::error::Result;

/// Transaction alias used across store call sites.
pub type Tx = Transaction<'static, Postgres>;

/// Handle over the connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction. Callers must commit explicitly; dropping the
    /// transaction rolls back and releases any advisory locks.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(self.pool.begin().await?)
    }
}
