use serde_json::Value;
use sqlx::{types::Json, PgPool};

use super::{Collection, DocumentStore, StoreError};

/// Postgres-backed store: one JSONB row per `(collection, id)`.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_documents (
                collection TEXT        NOT NULL,
                id         TEXT        NOT NULL,
                body       JSONB       NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
        fields: Option<&[&str]>,
    ) -> Result<Option<Value>, StoreError> {
        let row: Option<Json<Value>> = match fields {
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT body
                    FROM usage_documents
                    WHERE collection = $1
                      AND id = $2
                    "#,
                )
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(fields) => {
                // Project server-side so large arrays never leave the database.
                let keys: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
                sqlx::query_scalar(
                    r#"
                    SELECT COALESCE(
                        (SELECT jsonb_object_agg(e.key, e.value)
                         FROM jsonb_each(d.body) AS e
                         WHERE e.key = ANY($3)),
                        '{}'::jsonb
                    )
                    FROM usage_documents d
                    WHERE d.collection = $1
                      AND d.id = $2
                    "#,
                )
                .bind(collection.as_str())
                .bind(id)
                .bind(keys)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row.map(|Json(v)| v))
    }

    async fn set(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO usage_documents (collection, id, body, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (collection, id)
            DO UPDATE SET body = EXCLUDED.body, updated_at = now()
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Json(document))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
