//! Analytical Query Service
//!
//! Each operation is one consistent read: the manifest is loaded once,
//! the partitions it names are pruned against the requested time range,
//! the survivors are loaded into an in-memory table, and the SQL runs in
//! a fresh DataFusion session. Nothing is shared between calls except the
//! version-scoped result cache, so a concurrent ingest publishing a new
//! manifest can never tear a running query.

use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use loghouse_core::event::EventKind;
use loghouse_core::schema;
use loghouse_core::settings::Settings;
use loghouse_storage::layout::DatasetLayout;
use loghouse_storage::manifest::Manifest;
use loghouse_storage::retriever::{RawRecordHit, RawRecordRetriever};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::cache::{CachedEntry, QueryCache};
use crate::error::{QueryError, QueryResult};
use crate::types::{
    AggregateRow, AuthSummaryRow, ConnectionActivityRow, QueryFilters, SlowQueryGrouping,
    TrendPoint,
};

const CACHE_CAPACITY: usize = 64;

pub struct QueryService {
    settings: Settings,
    layout: DatasetLayout,
    cache: QueryCache,
}

impl QueryService {
    pub fn new(settings: Settings) -> Self {
        let layout = DatasetLayout::new(settings.out_root.clone());
        QueryService {
            settings,
            layout,
            cache: QueryCache::new(CACHE_CAPACITY),
        }
    }

    fn ensure_engine(&self) -> QueryResult<()> {
        if self.settings.disable_engine {
            return Err(QueryError::DegradedMode);
        }
        Ok(())
    }

    fn load_manifest(&self) -> QueryResult<Manifest> {
        Ok(Manifest::load(
            &self.layout,
            self.settings.parquet_compression.as_str(),
        )?)
    }

    /// Aggregate slow queries by namespace, slowest average first.
    pub async fn namespace_summary(
        &self,
        filters: &QueryFilters,
        limit: usize,
    ) -> QueryResult<Vec<AggregateRow>> {
        self.slow_query_aggregate(
            SlowQueryGrouping::Namespace,
            filters,
            "avg_duration_ms DESC",
            limit,
            "namespace_summary",
        )
        .await
    }

    /// Aggregate slow queries by plan summary, most executed first.
    pub async fn plan_summary(
        &self,
        filters: &QueryFilters,
        limit: usize,
    ) -> QueryResult<Vec<AggregateRow>> {
        self.slow_query_aggregate(
            SlowQueryGrouping::PlanSummary,
            filters,
            "executions DESC",
            limit,
            "plan_summary",
        )
        .await
    }

    /// Execution counts per operation type.
    pub async fn operation_mix(&self, filters: &QueryFilters) -> QueryResult<Vec<AggregateRow>> {
        self.slow_query_aggregate(
            SlowQueryGrouping::Operation,
            filters,
            "executions DESC",
            usize::MAX,
            "operation_mix",
        )
        .await
    }

    /// Aggregate by an arbitrary grouping, heaviest total time first.
    pub async fn trend_summary(
        &self,
        grouping: SlowQueryGrouping,
        filters: &QueryFilters,
        limit: usize,
    ) -> QueryResult<Vec<AggregateRow>> {
        self.slow_query_aggregate(
            grouping,
            filters,
            "total_duration_ms DESC",
            limit,
            "trend_summary",
        )
        .await
    }

    async fn slow_query_aggregate(
        &self,
        grouping: SlowQueryGrouping,
        filters: &QueryFilters,
        order_by: &str,
        limit: usize,
        op: &str,
    ) -> QueryResult<Vec<AggregateRow>> {
        self.ensure_engine()?;
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let (expr, alias) = grouping.expr();
        let key = format!("{}:{}:{}:{}", op, alias, filters.cache_key(), limit);

        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::Aggregates(rows) = &*entry {
                return Ok(rows.clone());
            }
        }

        let Some(ctx) = self
            .build_session(&manifest, EventKind::SlowQuery, filters)
            .await?
        else {
            return Ok(Vec::new());
        };

        let limit_clause = if limit == usize::MAX {
            String::new()
        } else {
            format!(" LIMIT {}", limit)
        };
        let sql = format!(
            "SELECT {expr} AS grp, \
             COUNT(*) AS executions, \
             AVG(duration_ms) AS avg_duration_ms, \
             MAX(duration_ms) AS max_duration_ms, \
             SUM(duration_ms) AS total_duration_ms, \
             SUM(docs_examined) AS total_docs_examined, \
             SUM(docs_returned) AS total_docs_returned \
             FROM slow_queries {where_clause} \
             GROUP BY {expr} \
             ORDER BY {order_by}{limit_clause}",
            where_clause = filters.where_clause(),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let groups = str_col(batch, "grp")?;
            let executions = i64_col(batch, "executions")?;
            let avgs = f64_col(batch, "avg_duration_ms")?;
            let maxes = i64_col(batch, "max_duration_ms")?;
            let totals = i64_col(batch, "total_duration_ms")?;
            let examined = i64_col(batch, "total_docs_examined")?;
            let returned = i64_col(batch, "total_docs_returned")?;
            for i in 0..batch.num_rows() {
                rows.push(AggregateRow {
                    group: groups.value(i).to_string(),
                    executions: executions.value(i) as u64,
                    avg_duration_ms: avgs.value(i),
                    max_duration_ms: maxes.value(i),
                    total_duration_ms: totals.value(i),
                    total_docs_examined: examined.value(i),
                    total_docs_returned: returned.value(i),
                });
            }
        }

        self.cache
            .put(version, key, Arc::new(CachedEntry::Aggregates(rows.clone())))
            .await;
        Ok(rows)
    }

    /// Time-bucketed trend series for slow queries.
    pub async fn trend_buckets(
        &self,
        grouping: SlowQueryGrouping,
        filters: &QueryFilters,
        bucket_minutes: u32,
    ) -> QueryResult<Vec<TrendPoint>> {
        self.ensure_engine()?;
        if bucket_minutes == 0 {
            return Err(QueryError::InvalidFilter(
                "bucket_minutes must be positive".to_string(),
            ));
        }
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let (expr, alias) = grouping.expr();
        let key = format!(
            "trend_buckets:{}:{}:{}",
            alias,
            filters.cache_key(),
            bucket_minutes
        );
        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::Trend(points) = &*entry {
                return Ok(points.clone());
            }
        }

        let Some(ctx) = self
            .build_session(&manifest, EventKind::SlowQuery, filters)
            .await?
        else {
            return Ok(Vec::new());
        };

        // Integer division floors non-negative epochs into their bucket
        let bucket_seconds = bucket_minutes as i64 * 60;
        let sql = format!(
            "SELECT {expr} AS grp, \
             ts_epoch / {bucket_seconds} AS bucket, \
             MIN(ts_epoch) AS bucket_start_epoch, \
             MAX(ts_epoch) AS bucket_end_epoch, \
             COUNT(*) AS executions, \
             AVG(duration_ms) AS avg_duration_ms, \
             MAX(duration_ms) AS max_duration_ms, \
             SUM(duration_ms) AS total_duration_ms \
             FROM slow_queries {where_clause} \
             GROUP BY {expr}, ts_epoch / {bucket_seconds} \
             ORDER BY bucket_start_epoch ASC",
            where_clause = filters.where_clause(),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let mut points = Vec::new();
        for batch in &batches {
            let groups = str_col(batch, "grp")?;
            let starts = i64_col(batch, "bucket_start_epoch")?;
            let ends = i64_col(batch, "bucket_end_epoch")?;
            let executions = i64_col(batch, "executions")?;
            let avgs = f64_col(batch, "avg_duration_ms")?;
            let maxes = i64_col(batch, "max_duration_ms")?;
            let totals = i64_col(batch, "total_duration_ms")?;
            for i in 0..batch.num_rows() {
                points.push(TrendPoint {
                    group: groups.value(i).to_string(),
                    bucket_start_epoch: starts.value(i),
                    bucket_end_epoch: ends.value(i),
                    executions: executions.value(i) as u64,
                    avg_duration_ms: avgs.value(i),
                    max_duration_ms: maxes.value(i),
                    total_duration_ms: totals.value(i),
                });
            }
        }

        self.cache
            .put(version, key, Arc::new(CachedEntry::Trend(points.clone())))
            .await;
        Ok(points)
    }

    /// Authentication outcomes grouped by result and mechanism.
    pub async fn auth_summary(&self, filters: &QueryFilters) -> QueryResult<Vec<AuthSummaryRow>> {
        self.ensure_engine()?;
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let key = format!("auth_summary:{}", filters.cache_key());
        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::AuthSummary(rows) = &*entry {
                return Ok(rows.clone());
            }
        }

        let Some(ctx) = self
            .build_session(&manifest, EventKind::Auth, filters)
            .await?
        else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT coalesce(result, 'unknown') AS result, \
             coalesce(mechanism, 'unknown') AS mechanism, \
             COUNT(*) AS events, \
             COUNT(DISTINCT \"user\") AS unique_users, \
             COUNT(DISTINCT remote_address) AS unique_hosts \
             FROM authentications {where_clause} \
             GROUP BY result, mechanism \
             ORDER BY events DESC",
            where_clause = filters.where_clause_for(EventKind::Auth),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let results = str_col(batch, "result")?;
            let mechanisms = str_col(batch, "mechanism")?;
            let events = i64_col(batch, "events")?;
            let users = i64_col(batch, "unique_users")?;
            let hosts = i64_col(batch, "unique_hosts")?;
            for i in 0..batch.num_rows() {
                rows.push(AuthSummaryRow {
                    result: results.value(i).to_string(),
                    mechanism: mechanisms.value(i).to_string(),
                    events: events.value(i) as u64,
                    unique_users: users.value(i) as u64,
                    unique_hosts: hosts.value(i) as u64,
                });
            }
        }

        self.cache
            .put(version, key, Arc::new(CachedEntry::AuthSummary(rows.clone())))
            .await;
        Ok(rows)
    }

    /// Connection lifecycle activity grouped by remote endpoint.
    pub async fn connection_activity(
        &self,
        filters: &QueryFilters,
    ) -> QueryResult<Vec<ConnectionActivityRow>> {
        self.ensure_engine()?;
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let key = format!("connection_activity:{}", filters.cache_key());
        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::Connections(rows) = &*entry {
                return Ok(rows.clone());
            }
        }

        let Some(ctx) = self
            .build_session(&manifest, EventKind::Connection, filters)
            .await?
        else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT coalesce(remote_address, 'unknown') AS remote_address, \
             SUM(CASE WHEN event = 'accepted' THEN 1 ELSE 0 END) AS accepted, \
             SUM(CASE WHEN event = 'ended' THEN 1 ELSE 0 END) AS ended, \
             MAX(connection_count) AS max_connection_count, \
             COUNT(DISTINCT connection_id) AS unique_connections \
             FROM connections {where_clause} \
             GROUP BY remote_address \
             ORDER BY accepted DESC",
            where_clause = filters.where_clause_for(EventKind::Connection),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let remotes = str_col(batch, "remote_address")?;
            let accepted = i64_col(batch, "accepted")?;
            let ended = i64_col(batch, "ended")?;
            let max_counts = i64_col(batch, "max_connection_count")?;
            let unique = i64_col(batch, "unique_connections")?;
            for i in 0..batch.num_rows() {
                rows.push(ConnectionActivityRow {
                    remote_address: remotes.value(i).to_string(),
                    accepted: accepted.value(i) as u64,
                    ended: ended.value(i) as u64,
                    max_connection_count: if max_counts.is_null(i) {
                        None
                    } else {
                        Some(max_counts.value(i))
                    },
                    unique_connections: unique.value(i) as u64,
                });
            }
        }

        self.cache
            .put(version, key, Arc::new(CachedEntry::Connections(rows.clone())))
            .await;
        Ok(rows)
    }

    /// Most recent slow-query executions as JSON rows, newest first.
    pub async fn recent_slow_queries(
        &self,
        filters: &QueryFilters,
        limit: usize,
    ) -> QueryResult<Vec<serde_json::Value>> {
        self.ensure_engine()?;
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let key = format!("recent_slow_queries:{}:{}", filters.cache_key(), limit);
        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::Rows(rows) = &*entry {
                return Ok(rows.clone());
            }
        }

        let Some(ctx) = self
            .build_session(&manifest, EventKind::SlowQuery, filters)
            .await?
        else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT \"timestamp\", ts_epoch, namespace, duration_ms, record_key, \
             plan_summary, operation, docs_examined, docs_returned, \
             connection_id, username \
             FROM slow_queries {where_clause} \
             ORDER BY ts_epoch DESC LIMIT {limit}",
            where_clause = filters.where_clause(),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;
        let rows = batches_to_json(&batches)?;

        self.cache
            .put(version, key, Arc::new(CachedEntry::Rows(rows.clone())))
            .await;
        Ok(rows)
    }

    /// Matching rows of any event kind as JSON, newest first. Filters
    /// naming columns the kind lacks are ignored.
    pub async fn search(
        &self,
        kind: EventKind,
        filters: &QueryFilters,
        limit: usize,
    ) -> QueryResult<Vec<serde_json::Value>> {
        self.ensure_engine()?;
        let manifest = self.load_manifest()?;
        let version = manifest.dataset_version;
        let key = format!("search:{}:{}:{}", kind, filters.cache_key(), limit);
        if let Some(entry) = self.cache.get(version, &key).await {
            if let CachedEntry::Rows(rows) = &*entry {
                return Ok(rows.clone());
            }
        }

        let Some(ctx) = self.build_session(&manifest, kind, filters).await? else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT * FROM {table} {where_clause} \
             ORDER BY ts_epoch DESC LIMIT {limit}",
            table = kind.dir_name(),
            where_clause = filters.where_clause_for(kind),
        );
        let batches = ctx.sql(&sql).await?.collect().await?;
        let rows = batches_to_json(&batches)?;

        self.cache
            .put(version, key, Arc::new(CachedEntry::Rows(rows.clone())))
            .await;
        Ok(rows)
    }

    /// Exact raw log lines for a record key, via the offset index. This
    /// path does not use the SQL engine and works while it is disabled.
    pub fn raw_records(
        &self,
        record_key: &str,
        kind: Option<EventKind>,
        limit: usize,
    ) -> QueryResult<Vec<RawRecordHit>> {
        let retriever = RawRecordRetriever::new(self.layout.clone());
        Ok(retriever.fetch(record_key, kind, limit)?)
    }

    /// Register the surviving partitions of `kind` as an in-memory table
    /// in a fresh session. `None` when no partition overlaps the filters.
    async fn build_session(
        &self,
        manifest: &Manifest,
        kind: EventKind,
        filters: &QueryFilters,
    ) -> QueryResult<Option<SessionContext>> {
        let survivors: Vec<_> = manifest
            .partitions_for(kind.dir_name())
            .filter(|p| {
                filters.start_ts.map_or(true, |start| p.max_ts >= start)
                    && filters.end_ts.map_or(true, |end| p.min_ts <= end)
            })
            .collect();
        if survivors.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            kind = %kind,
            total = manifest.partitions_for(kind.dir_name()).count(),
            scanned = survivors.len(),
            "partition pruning complete"
        );

        let mut batches: Vec<RecordBatch> = Vec::new();
        for partition in survivors {
            let file = std::fs::File::open(self.layout.resolve(&partition.path))?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
            for batch in reader {
                batches.push(batch?);
            }
        }

        let table = MemTable::try_new(schema::schema_for(kind), vec![batches])?;
        let ctx = SessionContext::new();
        ctx.register_table(kind.dir_name(), Arc::new(table))?;
        Ok(Some(ctx))
    }
}

fn batches_to_json(batches: &[RecordBatch]) -> QueryResult<Vec<serde_json::Value>> {
    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    let bytes = writer.into_inner();
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> QueryResult<&'a StringArray> {
    downcast(batch, name)
}

fn i64_col<'a>(batch: &'a RecordBatch, name: &str) -> QueryResult<&'a Int64Array> {
    downcast(batch, name)
}

fn f64_col<'a>(batch: &'a RecordBatch, name: &str) -> QueryResult<&'a Float64Array> {
    downcast(batch, name)
}

fn downcast<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> QueryResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| QueryError::ResultShape(format!("missing or mistyped column {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_disabled_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            out_root: dir.path().to_path_buf(),
            disable_engine: true,
            ..Settings::default()
        };
        let service = QueryService::new(settings);
        let err = service
            .namespace_summary(&QueryFilters::default(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::DegradedMode));
    }

    #[tokio::test]
    async fn test_empty_dataset_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            out_root: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let service = QueryService::new(settings);
        let rows = service
            .namespace_summary(&QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(rows.is_empty());
        let auth = service.auth_summary(&QueryFilters::default()).await.unwrap();
        assert!(auth.is_empty());
    }

    #[tokio::test]
    async fn test_zero_bucket_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            out_root: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let service = QueryService::new(settings);
        let err = service
            .trend_buckets(SlowQueryGrouping::Namespace, &QueryFilters::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidFilter(_)));
    }
}
