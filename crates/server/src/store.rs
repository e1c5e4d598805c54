//! Durable range-queryable persistence behind the `Store` contract.
//!
//! One row per container per cycle:
//!
//! ```sql
//! create table podstat (
//!     time              timestamptz not null,
//!     dt                bigint      not null,
//!     name              text        not null,
//!     cpuacct_usage_d   bigint      not null,
//!     throttled_time_d  bigint      not null,
//!     total_rss         bigint      not null,
//!     total_cache       bigint      not null,
//!     total_mapped_file bigint      not null,
//!     memory_limit      bigint      not null
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubestat_common::PodSample;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Relative time window ending before now: rows with
/// `time` in `(now - start, now - end)` whose name starts with the prefix.
#[derive(Debug, Clone, Default)]
pub struct StatQuery {
    pub start_secs: i64,
    pub end_secs: i64,
    pub name_prefix: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, samples: &[PodSample]) -> Result<(), StoreError>;
    async fn get(&self, query: &StatQuery) -> Result<Vec<PodSample>, StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }
}

const INSERT_SAMPLE: &str = "insert into podstat \
    (time, dt, name, cpuacct_usage_d, throttled_time_d, total_rss, total_cache, total_mapped_file, memory_limit) \
    values ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

const SELECT_SAMPLES: &str = "select time, dt, name, cpuacct_usage_d, throttled_time_d, \
    total_rss, total_cache, total_mapped_file, memory_limit from podstat \
    where time > now() - $1 * interval '1 second' \
      and time < now() - $2 * interval '1 second' \
      and name like $3 \
    order by time";

#[async_trait]
impl Store for PgStore {
    async fn put(&self, samples: &[PodSample]) -> Result<(), StoreError> {
        for sample in samples {
            sqlx::query(INSERT_SAMPLE)
                .bind(sample.time)
                .bind(sample.dt_ns)
                .bind(&sample.name)
                .bind(sample.cpuacct_usage_d)
                .bind(sample.throttled_time_d)
                .bind(sample.total_rss)
                .bind(sample.total_cache)
                .bind(sample.total_mapped_file)
                .bind(sample.hierarchical_memory_limit)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn get(&self, query: &StatQuery) -> Result<Vec<PodSample>, StoreError> {
        let rows = sqlx::query(SELECT_SAMPLES)
            .bind(query.start_secs)
            .bind(query.end_secs)
            .bind(format!("{}%", query.name_prefix))
            .fetch_all(&self.pool)
            .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let mut sample = PodSample::new("");
            sample.time = row.try_get::<DateTime<Utc>, _>("time")?;
            sample.dt_ns = row.try_get("dt")?;
            sample.name = row.try_get("name")?;
            sample.cpuacct_usage_d = row.try_get("cpuacct_usage_d")?;
            sample.throttled_time_d = row.try_get("throttled_time_d")?;
            sample.total_rss = row.try_get("total_rss")?;
            sample.total_cache = row.try_get("total_cache")?;
            sample.total_mapped_file = row.try_get("total_mapped_file")?;
            sample.hierarchical_memory_limit = row.try_get("memory_limit")?;
            samples.push(sample);
        }
        Ok(samples)
    }
}

/// In-memory store used by tests; mirrors the window and prefix semantics
/// of the SQL query while preserving insertion order.
#[cfg(test)]
pub(crate) struct MemoryStore {
    rows: std::sync::Mutex<Vec<PodSample>>,
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) fn new() -> Self {
        MemoryStore {
            rows: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, samples: &[PodSample]) -> Result<(), StoreError> {
        self.rows.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    async fn get(&self, query: &StatQuery) -> Result<Vec<PodSample>, StoreError> {
        let now = Utc::now();
        let window_start = now - chrono::Duration::seconds(query.start_secs);
        let window_end = now - chrono::Duration::seconds(query.end_secs);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.time > window_start && s.time < window_end)
            .filter(|s| s.name.starts_with(&query.name_prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, offset_secs: i64, delta: i64) -> PodSample {
        let mut s = PodSample::new("AAA-0001");
        s.name = name.to_string();
        s.time = Utc::now() - chrono::Duration::seconds(offset_secs);
        s.cpuacct_usage_d = delta;
        s
    }

    #[tokio::test]
    async fn prefix_query_returns_matching_rows_in_order() {
        let store = MemoryStore::new();
        store
            .put(&[
                sample("podAAA-0001", 10, 500),
                sample("podBBB-0002", 8, 900),
                sample("podAAA-0001", 5, 600),
            ])
            .await
            .unwrap();

        let query = StatQuery {
            start_secs: 3600,
            end_secs: 0,
            name_prefix: "podAAA".to_string(),
        };
        let rows = store.get(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cpuacct_usage_d, 500);
        assert_eq!(rows[1].cpuacct_usage_d, 600);
    }

    #[test]
    fn sql_window_is_exclusive_on_both_bounds() {
        // Keeps PgStore on the same open interval MemoryStore implements.
        assert!(SELECT_SAMPLES.contains("time > now() - $1"));
        assert!(SELECT_SAMPLES.contains("time < now() - $2"));
    }

    #[tokio::test]
    async fn window_excludes_rows_outside_the_interval() {
        let store = MemoryStore::new();
        store
            .put(&[sample("podAAA-0001", 120, 1), sample("podAAA-0001", 10, 2)])
            .await
            .unwrap();

        let query = StatQuery {
            start_secs: 60,
            end_secs: 0,
            name_prefix: String::new(),
        };
        let rows = store.get(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cpuacct_usage_d, 2);
    }
}
