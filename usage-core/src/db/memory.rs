use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use super::{Collection, DocumentStore, StoreError};

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<(Collection, String), Value>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub async fn len(&self, collection: Collection) -> usize {
        self.docs.lock().await.keys().filter(|(c, _)| *c == collection).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }
}

fn project(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
        fields: Option<&[&str]>,
    ) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(&(collection, id.to_string())).map(|doc| match fields {
            Some(fields) => project(doc, fields),
            None => doc.clone(),
        }))
    }

    async fn set(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        self.docs.lock().await.insert((collection, id.to_string()), document);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
