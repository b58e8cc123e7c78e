use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use usage_core::db::{Collection, DocumentStore, MemoryStore, PgDocumentStore, StoreError};

use crate::config::{StoreConfig, StoreKind};

/// The document store picked by `[store] kind`.
pub enum ConfiguredStore {
    Memory(MemoryStore),
    Postgres(PgDocumentStore),
}

/// Open the configured store. The Postgres table is created when missing.
pub async fn connect(cfg: &StoreConfig) -> anyhow::Result<ConfiguredStore> {
    match cfg.kind {
        StoreKind::Memory => {
            tracing::warn!("using in-memory document store; nothing survives a restart");
            Ok(ConfiguredStore::Memory(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(&cfg.uri)
                .await?;
            let store = PgDocumentStore::new(pool);
            store.ensure_schema().await?;
            Ok(ConfiguredStore::Postgres(store))
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for ConfiguredStore {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
        fields: Option<&[&str]>,
    ) -> Result<Option<Value>, StoreError> {
        match self {
            Self::Memory(s) => s.get(collection, id, fields).await,
            Self::Postgres(s) => s.get(collection, id, fields).await,
        }
    }

    async fn set(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.set(collection, id, document).await,
            Self::Postgres(s) => s.set(collection, id, document).await,
        }
    }
}
