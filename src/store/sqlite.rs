//! SQLite-backed store engine.

use super::schema;
use crate::store::{PutRecord, StoreEngine, StoreSpec, key_string};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

struct Inner {
    conn: Connection,
    /// Key path per store, learned at schema creation.
    key_paths: HashMap<String, Option<String>>,
}

/// Indexed local store over a single SQLite database.
pub struct SqliteStoreEngine {
    inner: Mutex<Inner>,
}

impl SqliteStoreEngine {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                key_paths: HashMap::new(),
            }),
        }
    }

    // ========== Read-back Operations ==========

    /// Fetch a record by key.
    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock().await;
        let sql = format!(
            "SELECT record FROM {} WHERE key = ?1",
            crate::source::quote_ident(store)
        );
        let text: Option<String> = inner
            .conn
            .query_row(&sql, [key], |row| row.get(0))
            .optional()?;
        match text {
            Some(t) => Ok(Some(serde_json::from_str(&t)?)),
            None => Ok(None),
        }
    }

    /// Number of records in a store.
    pub async fn count(&self, store: &str) -> Result<u64> {
        let inner = self.inner.lock().await;
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            crate::source::quote_ident(store)
        );
        let n: i64 = inner.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Whether a store exists.
    pub async fn has_store(&self, store: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let n: i64 = inner.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [store],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Whether an index exists.
    pub async fn has_index(&self, name: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let n: i64 = inner.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}

#[async_trait]
impl StoreEngine for SqliteStoreEngine {
    async fn create_schema(&self, specs: &[StoreSpec]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Inner { conn, key_paths } = &mut *inner;

        let tx = conn.transaction()?;
        for spec in specs {
            tx.execute(&schema::create_store(spec), [])?;
            for index in &spec.indices {
                tx.execute(&schema::create_index(&spec.name, index), [])?;
            }
        }
        tx.commit()?;

        for spec in specs {
            key_paths.insert(spec.name.clone(), spec.key_path.clone());
        }
        Ok(())
    }

    async fn write_page(&self, store: &str, page: &[PutRecord]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Inner { conn, key_paths } = &mut *inner;
        let key_path = key_paths.get(store).cloned().flatten();

        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT OR REPLACE INTO {} (key, record) VALUES (?1, ?2)",
                crate::source::quote_ident(store)
            );
            let mut stmt = tx.prepare(&sql)?;
            for put in page {
                let key = record_key(put, key_path.as_deref())?;
                stmt.execute(params![key, serde_json::to_string(&put.record)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Explicit key, or the value at the store's key path.
fn record_key(put: &PutRecord, key_path: Option<&str>) -> Result<String> {
    if let Some(key) = &put.key {
        return Ok(key.clone());
    }
    let path = key_path.ok_or_else(|| {
        Error::PageStorage("store has no key path and no explicit key was given".to_string())
    })?;
    let value = put
        .record
        .get(path)
        .ok_or_else(|| Error::PageStorage(format!("record is missing key column {}", path)))?;
    Ok(key_string(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexSpec;
    use serde_json::json;

    fn keyed_spec(name: &str, key: &str) -> StoreSpec {
        StoreSpec {
            name: name.to_string(),
            key_path: Some(key.to_string()),
            indices: Vec::new(),
        }
    }

    fn put(record: Value) -> PutRecord {
        PutRecord {
            key: None,
            record,
        }
    }

    #[tokio::test]
    async fn test_natural_key_put_and_get() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        engine.create_schema(&[keyed_spec("orders", "id")]).await.unwrap();

        engine
            .write_page(
                "orders",
                &[
                    put(json!({"id": 1, "name": "first"})),
                    put(json!({"id": 2, "name": "second"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(engine.count("orders").await.unwrap(), 2);
        let record = engine.get("orders", "2").await.unwrap().unwrap();
        assert_eq!(record["name"], "second");
        assert!(engine.get("orders", "9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_composite_keys() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        let spec = StoreSpec {
            name: "line_items".to_string(),
            key_path: None,
            indices: vec![IndexSpec {
                name: "idx_multiple_pkeys".to_string(),
                columns: vec!["order_id".to_string(), "line_no".to_string()],
            }],
        };
        engine.create_schema(&[spec]).await.unwrap();

        engine
            .write_page(
                "line_items",
                &[PutRecord {
                    key: Some("1_2".to_string()),
                    record: json!({"order_id": 1, "line_no": 2, "sku": "A-77"}),
                }],
            )
            .await
            .unwrap();

        let record = engine.get("line_items", "1_2").await.unwrap().unwrap();
        assert_eq!(record["sku"], "A-77");
        assert!(engine
            .has_index("line_items_idx_multiple_pkeys")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_secondary_indices_created() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        let mut spec = keyed_spec("orders", "id");
        spec.indices.push(IndexSpec {
            name: "idx_orders_customer".to_string(),
            columns: vec!["customer_id".to_string()],
        });
        engine.create_schema(&[spec]).await.unwrap();

        assert!(engine.has_index("orders_idx_orders_customer").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_creation_is_atomic() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        // the duplicate second store fails the whole unit
        let result = engine
            .create_schema(&[keyed_spec("orders", "id"), keyed_spec("orders", "id")])
            .await;
        assert!(result.is_err());
        assert!(!engine.has_store("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_page_replaces_on_same_key() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        engine.create_schema(&[keyed_spec("orders", "id")]).await.unwrap();

        engine
            .write_page("orders", &[put(json!({"id": 1, "name": "old"}))])
            .await
            .unwrap();
        engine
            .write_page("orders", &[put(json!({"id": 1, "name": "new"}))])
            .await
            .unwrap();

        assert_eq!(engine.count("orders").await.unwrap(), 1);
        let record = engine.get("orders", "1").await.unwrap().unwrap();
        assert_eq!(record["name"], "new");
    }

    #[tokio::test]
    async fn test_missing_key_column_rejects_page() {
        let engine = SqliteStoreEngine::open_in_memory().unwrap();
        engine.create_schema(&[keyed_spec("orders", "id")]).await.unwrap();

        let result = engine
            .write_page("orders", &[put(json!({"name": "keyless"}))])
            .await;
        assert!(matches!(result, Err(Error::PageStorage(_))));
    }
}
