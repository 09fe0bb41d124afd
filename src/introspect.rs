//! Schema introspection for the export side.
//!
//! Discovers base tables, per-table row counts, primary keys, secondary
//! indices, and column types through the query capability. The table list
//! is fetched first; the count fan-out, the combined index/constraint
//! query, and the columns query then run concurrently and are awaited with
//! a single combined wait. Any failure is fatal for the run.

use crate::source::{QueryExecutor, quote_literal, quote_table};
use crate::{Error, Result, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Schemas never exported.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

/// Everything the exporter needs to know about the source schema.
#[derive(Debug, Clone, Default)]
pub struct Introspection {
    /// Table identifiers, qualified as `schema.table` unless a single
    /// schema was configured.
    pub tables: Vec<String>,
    pub row_counts: BTreeMap<String, u64>,
    /// Primary-key columns per table, in declared key order.
    pub primary_keys: BTreeMap<String, Vec<String>>,
    /// Secondary indices per table: index name to ordered column list.
    pub indices: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Column name to source data-type tag, per table.
    pub columns: BTreeMap<String, BTreeMap<String, String>>,
}

pub async fn introspect(
    executor: Arc<dyn QueryExecutor>,
    schema: Option<&str>,
) -> Result<Introspection> {
    let tables = list_tables(executor.as_ref(), schema).await?;
    tracing::debug!(tables = tables.len(), "discovered base tables");

    let (row_counts, (primary_keys, indices), columns) = tokio::try_join!(
        count_rows(executor.clone(), &tables),
        key_columns(executor.as_ref(), schema),
        column_types(executor.as_ref(), schema),
    )?;

    Ok(Introspection {
        tables,
        row_counts,
        primary_keys,
        indices,
        columns,
    })
}

/// Manifest key for a table: unqualified under a configured schema,
/// `schema.table` otherwise.
fn table_ident(configured: Option<&str>, table_schema: &str, table_name: &str) -> String {
    if configured.is_some() {
        table_name.to_string()
    } else {
        format!("{}.{}", table_schema, table_name)
    }
}

async fn list_tables(executor: &dyn QueryExecutor, schema: Option<&str>) -> Result<Vec<String>> {
    let filter = match schema {
        Some(s) => format!(" AND table_schema = {}", quote_literal(s)),
        None => String::new(),
    };
    let sql = format!(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE'{} \
         ORDER BY table_schema, table_name",
        filter
    );

    let mut tables = Vec::new();
    for row in executor.query(&sql).await? {
        let table_schema = text_field(&row, "table_schema")?;
        if schema.is_none() && SYSTEM_SCHEMAS.contains(&table_schema.as_str()) {
            continue;
        }
        let table_name = text_field(&row, "table_name")?;
        tables.push(table_ident(schema, &table_schema, &table_name));
    }
    Ok(tables)
}

async fn count_rows(
    executor: Arc<dyn QueryExecutor>,
    tables: &[String],
) -> Result<BTreeMap<String, u64>> {
    let mut set = JoinSet::new();
    for table in tables {
        let executor = executor.clone();
        let table = table.clone();
        set.spawn(async move {
            let sql = format!("SELECT COUNT(*) AS count FROM {}", quote_table(&table));
            let rows = executor.query(&sql).await?;
            let count = rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(count_value)
                .ok_or_else(|| Error::Query(format!("no count returned for {}", table)))?;
            Ok::<_, Error>((table, count))
        });
    }

    let mut counts = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        let (table, count) = joined.map_err(|e| Error::Query(e.to_string()))??;
        counts.insert(table, count);
    }
    Ok(counts)
}

/// Counts arrive as JSON numbers, or as strings from clients that render
/// 64-bit integers textually.
fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

type KeyColumns = (
    BTreeMap<String, Vec<String>>,
    BTreeMap<String, BTreeMap<String, Vec<String>>>,
);

/// One combined index/constraint query; rows flagged as the primary-key
/// constraint populate `primary_keys`, all others populate `indices`.
async fn key_columns(executor: &dyn QueryExecutor, schema: Option<&str>) -> Result<KeyColumns> {
    let filter = match schema {
        Some(s) => format!(" AND n.nspname = {}", quote_literal(s)),
        None => String::new(),
    };
    let sql = format!(
        "SELECT n.nspname AS table_schema, t.relname AS table_name, \
                i.relname AS index_name, a.attname AS column_name, \
                ix.indisprimary AS is_primary \
         FROM pg_class t \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         JOIN pg_index ix ON t.oid = ix.indrelid \
         JOIN pg_class i ON i.oid = ix.indexrelid \
         JOIN unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
         JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
         WHERE t.relkind = 'r' \
           AND n.nspname NOT IN ('pg_catalog', 'information_schema'){} \
         ORDER BY n.nspname, t.relname, i.relname, k.ord",
        filter
    );

    let mut primary: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut secondary: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for row in executor.query(&sql).await? {
        let table_schema = text_field(&row, "table_schema")?;
        let table_name = text_field(&row, "table_name")?;
        let index_name = text_field(&row, "index_name")?;
        let column = text_field(&row, "column_name")?;
        let table = table_ident(schema, &table_schema, &table_name);

        if is_primary_index(&row, &index_name) {
            primary.entry(table).or_default().push(column);
        } else {
            secondary
                .entry(table)
                .or_default()
                .entry(index_name)
                .or_default()
                .push(column);
        }
    }
    Ok((primary, secondary))
}

/// Primary-key rows carry the `is_primary` flag; the `_pkey` name suffix is
/// the fallback when the flag is missing.
fn is_primary_index(row: &Row, index_name: &str) -> bool {
    match row.get("is_primary") {
        Some(Value::Bool(flag)) => *flag,
        _ => index_name.ends_with("_pkey"),
    }
}

async fn column_types(
    executor: &dyn QueryExecutor,
    schema: Option<&str>,
) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let filter = match schema {
        Some(s) => format!("table_schema = {}", quote_literal(s)),
        None => "table_schema NOT IN ('pg_catalog', 'information_schema')".to_string(),
    };
    let sql = format!(
        "SELECT table_schema, table_name, column_name, data_type \
         FROM information_schema.columns WHERE {} \
         ORDER BY table_schema, table_name, ordinal_position",
        filter
    );

    let mut columns: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for row in executor.query(&sql).await? {
        let table_schema = text_field(&row, "table_schema")?;
        let table_name = text_field(&row, "table_name")?;
        let table = table_ident(schema, &table_schema, &table_name);
        columns
            .entry(table)
            .or_default()
            .insert(text_field(&row, "column_name")?, text_field(&row, "data_type")?);
    }
    Ok(columns)
}

fn text_field(row: &Row, name: &str) -> Result<String> {
    row.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Query(format!("introspection row missing {}", name)))
}
