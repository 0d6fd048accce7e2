use crate::storage::{Partition, StorageError, Tier};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::query::Query;
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Durable structured store: one SQLite table per partition, each row keeping the
/// record body as JSON next to the columns it is indexed by.
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // An in-memory database lives and dies with its connection
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create partitions and indexes on first use
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                id INTEGER PRIMARY KEY,
                short_code TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_urls_short_code ON urls(short_code)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_created_at ON urls(created_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_clicks ON urls(clicks)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics (
                url_id TEXT PRIMARY KEY,
                timestamp INTEGER,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analytics_timestamp ON analytics(timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                type TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_security_timestamp ON security(timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_security_type ON security(type)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON cache(timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_expiry ON cache(expiry)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    pub async fn count(&self, partition: Partition) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", partition.as_str());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn clear(&self, partition: Partition) -> Result<u64> {
        let sql = format!("DELETE FROM {}", partition.as_str());
        let result = sqlx::query(&sql).execute(self.pool.as_ref()).await?;
        Ok(result.rows_affected())
    }

    /// Range delete over the cache expiry index, returning the removed keys
    pub async fn delete_expired_cache(&self, now: i64) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM cache WHERE expiry <= ? ORDER BY expiry ASC",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cache WHERE expiry <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(keys)
    }

    /// Range delete over the security timestamp index, returning the removed ids
    pub async fn delete_security_before(&self, cutoff: i64) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM security WHERE timestamp < ? ORDER BY timestamp ASC",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM security WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    /// Keep the `keep` most recent security entries, dropping the rest oldest-first
    pub async fn trim_security(&self, keep: u64) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM security
            ORDER BY timestamp DESC, id DESC
            LIMIT -1 OFFSET ?
            "#,
        )
        .bind(keep as i64)
        .fetch_all(&mut *tx)
        .await?;

        for id in &ids {
            sqlx::query("DELETE FROM security WHERE id = ?")
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_key<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    partition: Partition,
    key: &str,
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
    if partition.integer_key() {
        Ok(query.bind(key.parse::<i64>()?))
    } else {
        Ok(query.bind(key.to_string()))
    }
}

fn bind_index_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Option<&Value>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Some(Value::String(s)) => query.bind(s.clone()),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Some(Value::Bool(b)) => query.bind(*b as i64),
        _ => query.bind(None::<i64>),
    }
}

#[async_trait]
impl Tier for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>> {
        let sql = format!(
            "SELECT body FROM {} WHERE {} = ?",
            partition.as_str(),
            partition.key_column()
        );
        let query = sqlx::query_scalar::<_, String>(&sql);
        let body = if partition.integer_key() {
            query
                .bind(key.parse::<i64>()?)
                .fetch_optional(self.pool.as_ref())
                .await?
        } else {
            query.bind(key).fetch_optional(self.pool.as_ref()).await?
        };

        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    async fn put(&self, partition: Partition, key: &str, record: &Value) -> Result<()> {
        let columns = partition.index_columns();
        let mut names = vec![partition.key_column()];
        names.extend(columns.iter().map(|(column, _)| *column));
        names.push("body");

        let placeholders = vec!["?"; names.len()].join(", ");
        let updates = names[1..]
            .iter()
            .map(|n| format!("{n} = excluded.{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
            partition.as_str(),
            names.join(", "),
            placeholders,
            partition.key_column(),
            updates
        );

        let mut query = bind_key(sqlx::query(&sql), partition, key)?;
        for (_, field) in columns {
            query = bind_index_value(query, record.get(*field));
        }
        query = query.bind(serde_json::to_string(record)?);

        match query.execute(self.pool.as_ref()).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Conflict.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            partition.as_str(),
            partition.key_column()
        );
        let result = bind_key(sqlx::query(&sql), partition, key)?
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan_all(&self, partition: Partition) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT body FROM {} ORDER BY {} ASC",
            partition.as_str(),
            partition.key_column()
        );
        let bodies = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(self.pool.as_ref())
            .await?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(Into::into))
            .collect()
    }
}
