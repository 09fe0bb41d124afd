//! Reference [`QueryExecutor`] backed by tokio-postgres.

use crate::source::QueryExecutor;
use crate::{Error, Result, Row};
use async_trait::async_trait;
use tokio_postgres::NoTls;

/// PostgreSQL query adapter.
///
/// Every statement is wrapped as `SELECT row_to_json(q)::text FROM (…) q`,
/// so rows cross the capability boundary as JSON text and no client-side
/// type mapping is needed.
pub struct PostgresExecutor {
    client: tokio_postgres::Client,
}

impl PostgresExecutor {
    /// Connect with a libpq-style parameter string (`host=… user=…`).
    pub async fn connect(params: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(params, NoTls)
            .await
            .map_err(|e| Error::Query(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {}", e);
            }
        });
        Ok(Self { client })
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let wrapped = format!(
            "SELECT row_to_json(q)::text AS r FROM ({}) AS q",
            sql.trim_end_matches(';')
        );
        let rows = self
            .client
            .query(&wrapped, &[])
            .await
            .map_err(|e| Error::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let text: &str = row
                .try_get(0)
                .map_err(|e| Error::Query(e.to_string()))?;
            match serde_json::from_str::<serde_json::Value>(text)? {
                serde_json::Value::Object(map) => out.push(map),
                other => {
                    return Err(Error::Query(format!(
                        "expected a JSON object row, got {}",
                        other
                    )));
                }
            }
        }
        Ok(out)
    }
}
