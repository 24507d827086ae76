use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::{Filter, SortOrder, Store, StoredRecord, Table};
use crate::errors::SentinelError;

type Result<T> = std::result::Result<T, SentinelError>;

/// SQLite-backed audit store. One connection; writes are serialized by the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

enum Bound {
    Text(String),
    Int(i64),
    Real(f64),
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database that lives as long as
    /// the store.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&format!("sqlite:{db_path}?mode=rwc"))
                .await?
        };

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| SentinelError::Store {
                reason: format!("migration failed: {e}"),
            })?;

        info!(db_path, "audit store initialized");
        Ok(Self { pool })
    }

    fn where_clause(filter: &Filter) -> Result<(String, Vec<Bound>)> {
        let mut clauses = Vec::with_capacity(filter.equals.len());
        let mut binds = Vec::new();

        for (field, value) in &filter.equals {
            if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SentinelError::Store {
                    reason: format!("invalid filter field '{field}'"),
                });
            }
            let path = format!("json_extract(record, '$.{field}')");
            match value {
                Value::Null => clauses.push(format!("{path} IS NULL")),
                Value::String(s) => {
                    clauses.push(format!("{path} = ?"));
                    binds.push(Bound::Text(s.clone()));
                }
                Value::Bool(b) => {
                    clauses.push(format!("{path} = ?"));
                    binds.push(Bound::Int(i64::from(*b)));
                }
                Value::Number(n) => {
                    clauses.push(format!("{path} = ?"));
                    match n.as_i64() {
                        Some(i) => binds.push(Bound::Int(i)),
                        None => binds.push(Bound::Real(n.as_f64().unwrap_or(f64::NAN))),
                    }
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(SentinelError::Store {
                        reason: format!("filter on '{field}' must be a scalar"),
                    });
                }
            }
        }

        if clauses.is_empty() {
            Ok((String::new(), binds))
        } else {
            Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, table: Table, record: Value) -> Result<i64> {
        let text = serde_json::to_string(&record)?;
        let created_at = chrono::Utc::now().timestamp();

        let sql = format!("INSERT INTO {table} (created_at, record) VALUES (?, ?)");
        let result = sqlx::query(&sql)
            .bind(created_at)
            .bind(text)
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!(%table, id, "audit record stored");
        Ok(id)
    }

    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<StoredRecord>> {
        let (where_sql, binds) = Self::where_clause(filter)?;
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT id, created_at, record FROM {table}{where_sql} ORDER BY id {direction} LIMIT ?"
        );

        let mut query = sqlx::query(&sql);
        for bound in binds {
            query = match bound {
                Bound::Text(s) => query.bind(s),
                Bound::Int(i) => query.bind(i),
                Bound::Real(f) => query.bind(f),
            };
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let text: String = row.try_get("record")?;
                Ok(StoredRecord {
                    id: row.try_get("id")?,
                    created_at: row.try_get("created_at")?,
                    record: serde_json::from_str(&text)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_returns_increasing_ids() {
        let store = memory_store().await;
        let a = store.insert(Table::TriggerEvents, json!({"symbol": "BTCUSDT"})).await.unwrap();
        let b = store.insert(Table::TriggerEvents, json!({"symbol": "ETHUSDT"})).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_query_filters_by_json_field() {
        let store = memory_store().await;
        for (symbol, id) in [("BTCUSDT", "rsi"), ("ETHUSDT", "rsi"), ("BTCUSDT", "pump")] {
            store
                .insert(
                    Table::TriggerEvents,
                    json!({"symbol": symbol, "condition_id": id}),
                )
                .await
                .unwrap();
        }

        let btc = store
            .query(
                Table::TriggerEvents,
                &Filter::all().eq("symbol", "BTCUSDT"),
                10,
                SortOrder::Asc,
            )
            .await
            .unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[0].record["condition_id"], "rsi");
        assert_eq!(btc[1].record["condition_id"], "pump");

        let btc_rsi = store
            .query(
                Table::TriggerEvents,
                &Filter::all().eq("symbol", "BTCUSDT").eq("condition_id", "rsi"),
                10,
                SortOrder::Desc,
            )
            .await
            .unwrap();
        assert_eq!(btc_rsi.len(), 1);
    }

    #[tokio::test]
    async fn test_query_order_and_limit() {
        let store = memory_store().await;
        for i in 0..5 {
            store
                .insert(Table::DecisionResults, json!({"n": i}))
                .await
                .unwrap();
        }
        let latest = store
            .query(Table::DecisionResults, &Filter::all(), 2, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].record["n"], 4);
        assert_eq!(latest[1].record["n"], 3);
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = memory_store().await;
        store
            .insert(Table::CapabilityInvocations, json!({"capability": "get_market_data"}))
            .await
            .unwrap();
        let events = store
            .query(Table::TriggerEvents, &Filter::all(), 10, SortOrder::Asc)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_filter_on_bool_and_number() {
        let store = memory_store().await;
        store
            .insert(Table::CapabilityInvocations, json!({"ok": true, "attempts": 2}))
            .await
            .unwrap();
        store
            .insert(Table::CapabilityInvocations, json!({"ok": false, "attempts": 1}))
            .await
            .unwrap();

        let ok = store
            .query(
                Table::CapabilityInvocations,
                &Filter::all().eq("ok", true),
                10,
                SortOrder::Asc,
            )
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].record["attempts"], 2);

        let single = store
            .query(
                Table::CapabilityInvocations,
                &Filter::all().eq("attempts", 1),
                10,
                SortOrder::Asc,
            )
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].record["ok"], false);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_field_names() {
        let store = memory_store().await;
        let err = store
            .query(
                Table::TriggerEvents,
                &Filter::all().eq("symbol') OR 1=1 --", "x"),
                10,
                SortOrder::Asc,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Store { .. }));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).await.unwrap();
            store
                .insert(Table::TriggerEvents, json!({"symbol": "BTCUSDT"}))
                .await
                .unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteStore::new(path).await.unwrap();
        let rows = reopened
            .query(Table::TriggerEvents, &Filter::all(), 10, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record["symbol"], "BTCUSDT");
    }
}
