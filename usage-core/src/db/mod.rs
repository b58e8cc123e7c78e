//! Document persistence: one whole JSON document per entity, keyed by id.

pub mod memory;
pub mod pg_documents;

pub use memory::MemoryStore;
pub use pg_documents::PgDocumentStore;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::domain::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Sites,
    Stations,
    Meters,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Sites => "sites",
            Collection::Stations => "stations",
            Collection::Meters => "meters",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("document serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid document: {0}")]
    Document(#[from] DocumentError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value document store. Writes replace the whole document; reads may
/// ask for a subset of top-level fields.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
        fields: Option<&[&str]>,
    ) -> Result<Option<Value>, StoreError>;

    async fn set(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError>;
}

/// Typed read.
pub async fn load<T, S>(
    store: &S,
    collection: Collection,
    id: &str,
    fields: Option<&[&str]>,
) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    match store.get(collection, id, fields).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed whole-document write.
pub async fn save<T, S>(store: &S, collection: Collection, id: &str, document: &T) -> Result<(), StoreError>
where
    T: Serialize,
    S: DocumentStore + ?Sized,
{
    store.set(collection, id, serde_json::to_value(document)?).await
}
