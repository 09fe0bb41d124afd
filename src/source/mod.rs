//! Source-database capability boundary.
//!
//! The core issues information-schema-style SQL through [`QueryExecutor`]
//! and receives rows back as flat JSON objects. Which client library runs
//! the SQL is an adapter concern; [`postgres`] ships the reference adapter.

pub mod postgres;

use crate::{Result, Row};
use async_trait::async_trait;

/// Read-only query capability, shared by every concurrent table operation.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` and return all result rows.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Release the underlying connection once the run completes.
    async fn close(&self) {}
}

/// Quote an identifier for inclusion in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table identifier.
pub fn quote_table(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(name),
    }
}

/// Quote a string literal for inclusion in SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
