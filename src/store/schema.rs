//! SQL builders for the SQLite store engine.
//!
//! Each store becomes a two-column table `(key TEXT PRIMARY KEY, record
//! TEXT)` holding the record as JSON; secondary indices are expression
//! indices over `json_extract`. Index names are prefixed with the store
//! name because SQLite's index namespace spans the whole database.

use crate::source::quote_ident;
use crate::store::{IndexSpec, StoreSpec};

/// `CREATE TABLE` statement for a store.
pub fn create_store(spec: &StoreSpec) -> String {
    format!(
        "CREATE TABLE {} (key TEXT PRIMARY KEY, record TEXT NOT NULL)",
        quote_ident(&spec.name)
    )
}

/// `CREATE INDEX` statement for a secondary index on a store.
pub fn create_index(store: &str, index: &IndexSpec) -> String {
    let exprs: Vec<String> = index
        .columns
        .iter()
        .map(|column| format!("json_extract(record, {})", json_path(column)))
        .collect();
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&format!("{}_{}", store, index.name)),
        quote_ident(store),
        exprs.join(", ")
    )
}

/// SQL string literal for a JSON path addressing a top-level column.
fn json_path(column: &str) -> String {
    format!("'$.\"{}\"'", column.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_store_statement() {
        let spec = StoreSpec {
            name: "public.orders".to_string(),
            key_path: Some("id".to_string()),
            indices: Vec::new(),
        };
        assert_eq!(
            create_store(&spec),
            "CREATE TABLE \"public.orders\" (key TEXT PRIMARY KEY, record TEXT NOT NULL)"
        );
    }

    #[test]
    fn test_create_index_statement() {
        let index = IndexSpec {
            name: "idx_customer".to_string(),
            columns: vec!["customer_id".to_string(), "placed_at".to_string()],
        };
        assert_eq!(
            create_index("orders", &index),
            "CREATE INDEX \"orders_idx_customer\" ON \"orders\" \
             (json_extract(record, '$.\"customer_id\"'), json_extract(record, '$.\"placed_at\"'))"
        );
    }
}
