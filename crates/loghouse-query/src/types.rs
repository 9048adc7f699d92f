//! Query Parameter and Result Types

use loghouse_core::EventKind;
use serde::Serialize;

/// Databases treated as internal when `exclude_system` is set.
pub const SYSTEM_DATABASES: [&str; 5] = ["admin", "local", "config", "$external", "unknown"];

/// Closed filter set shared by every analytical operation. Filters that
/// name a column a kind lacks are ignored for that kind.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Inclusive lower bound on `ts_epoch`.
    pub start_ts: Option<i64>,
    /// Inclusive upper bound on `ts_epoch`.
    pub end_ts: Option<i64>,
    /// Exact database match. Takes precedence over `exclude_system`.
    pub database: Option<String>,
    /// Exact namespace match (slow queries only).
    pub namespace: Option<String>,
    /// Exact user match (`username` on slow queries, `user` on auth).
    pub user: Option<String>,
    /// Drop rows from internal databases.
    pub exclude_system: bool,
}

impl QueryFilters {
    /// Render the filters as a SQL WHERE clause for the slow-query table,
    /// or an empty string when nothing is constrained. String literals
    /// are escaped inline.
    pub fn where_clause(&self) -> String {
        self.where_clause_for(EventKind::SlowQuery)
    }

    /// WHERE clause rendered against the columns `kind` actually has.
    pub fn where_clause_for(&self, kind: EventKind) -> String {
        let mut clauses: Vec<String> = Vec::new();
        if kind != EventKind::Connection {
            // Auth rows may lack a database; treat missing as 'unknown' so
            // NOT IN never drops them through a NULL comparison.
            let column = match kind {
                EventKind::SlowQuery => "database",
                _ => "coalesce(database, 'unknown')",
            };
            if let Some(db) = &self.database {
                clauses.push(format!("{} = '{}'", column, sql_escape(db)));
            } else if self.exclude_system {
                let list = SYSTEM_DATABASES
                    .iter()
                    .map(|db| format!("'{}'", sql_escape(db)))
                    .collect::<Vec<_>>()
                    .join(", ");
                clauses.push(format!("{} NOT IN ({})", column, list));
            }
        }
        if kind == EventKind::SlowQuery {
            if let Some(ns) = &self.namespace {
                clauses.push(format!("namespace = '{}'", sql_escape(ns)));
            }
        }
        if let Some(user) = &self.user {
            match kind {
                EventKind::SlowQuery => {
                    clauses.push(format!("username = '{}'", sql_escape(user)));
                }
                EventKind::Auth => {
                    clauses.push(format!("\"user\" = '{}'", sql_escape(user)));
                }
                EventKind::Connection => {}
            }
        }
        if let Some(start) = self.start_ts {
            clauses.push(format!("ts_epoch >= {}", start));
        }
        if let Some(end) = self.end_ts {
            clauses.push(format!("ts_epoch <= {}", end));
        }
        if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        }
    }

    /// Key fragment for the result cache.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.start_ts.map_or(String::new(), |v| v.to_string()),
            self.end_ts.map_or(String::new(), |v| v.to_string()),
            self.database.as_deref().unwrap_or(""),
            self.namespace.as_deref().unwrap_or(""),
            self.user.as_deref().unwrap_or(""),
            self.exclude_system,
        )
    }
}

/// Escape a string literal for inline SQL.
pub fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Grouping dimension for slow-query trend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowQueryGrouping {
    Namespace,
    Database,
    PlanSummary,
    Operation,
    RecordKey,
    /// `namespace::plan_summary::record_key` composite.
    PatternKey,
}

impl SlowQueryGrouping {
    /// (SQL expression, alias) pair for SELECT and GROUP BY.
    pub fn expr(&self) -> (&'static str, &'static str) {
        match self {
            SlowQueryGrouping::Namespace => {
                ("coalesce(nullif(namespace, ''), 'unknown')", "namespace")
            }
            SlowQueryGrouping::Database => {
                ("coalesce(nullif(database, ''), 'unknown')", "database")
            }
            SlowQueryGrouping::PlanSummary => {
                ("coalesce(nullif(plan_summary, ''), 'None')", "plan_summary")
            }
            SlowQueryGrouping::Operation => {
                ("coalesce(nullif(operation, ''), 'unknown')", "operation")
            }
            SlowQueryGrouping::RecordKey => {
                ("coalesce(nullif(record_key, ''), 'unknown')", "record_key")
            }
            SlowQueryGrouping::PatternKey => (
                "concat_ws('::', namespace, plan_summary, record_key)",
                "pattern_key",
            ),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "namespace" => Some(SlowQueryGrouping::Namespace),
            "database" => Some(SlowQueryGrouping::Database),
            "plan_summary" => Some(SlowQueryGrouping::PlanSummary),
            "operation" => Some(SlowQueryGrouping::Operation),
            "record_key" => Some(SlowQueryGrouping::RecordKey),
            "pattern_key" => Some(SlowQueryGrouping::PatternKey),
            _ => None,
        }
    }
}

/// One aggregate result group for slow queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateRow {
    pub group: String,
    pub executions: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub total_duration_ms: i64,
    pub total_docs_examined: i64,
    pub total_docs_returned: i64,
}

/// Aggregated authentication outcome counts.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthSummaryRow {
    pub result: String,
    pub mechanism: String,
    pub events: u64,
    pub unique_users: u64,
    pub unique_hosts: u64,
}

/// Connection lifecycle activity per remote endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionActivityRow {
    pub remote_address: String,
    pub accepted: u64,
    pub ended: u64,
    pub max_connection_count: Option<i64>,
    pub unique_connections: u64,
}

/// One time bucket in a trend series.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendPoint {
    pub group: String,
    pub bucket_start_epoch: i64,
    pub bucket_end_epoch: i64,
    pub executions: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub total_duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filters_no_where() {
        assert_eq!(QueryFilters::default().where_clause(), "");
    }

    #[test]
    fn test_database_filter_wins_over_exclude_system() {
        let filters = QueryFilters {
            database: Some("shop".to_string()),
            exclude_system: true,
            ..QueryFilters::default()
        };
        assert_eq!(filters.where_clause(), "WHERE database = 'shop'");
    }

    #[test]
    fn test_exclude_system_lists_internal_databases() {
        let filters = QueryFilters {
            exclude_system: true,
            ..QueryFilters::default()
        };
        let clause = filters.where_clause();
        assert!(clause.contains("database NOT IN ("));
        assert!(clause.contains("'admin'"));
        assert!(clause.contains("'$external'"));
    }

    #[test]
    fn test_time_bounds_inclusive() {
        let filters = QueryFilters {
            start_ts: Some(100),
            end_ts: Some(200),
            ..QueryFilters::default()
        };
        assert_eq!(
            filters.where_clause(),
            "WHERE ts_epoch >= 100 AND ts_epoch <= 200"
        );
    }

    #[test]
    fn test_sql_escape_quotes() {
        let filters = QueryFilters {
            namespace: Some("it's.odd".to_string()),
            ..QueryFilters::default()
        };
        assert_eq!(filters.where_clause(), "WHERE namespace = 'it''s.odd'");
    }

    #[test]
    fn test_clause_renders_per_kind_columns() {
        let filters = QueryFilters {
            start_ts: Some(10),
            database: Some("shop".to_string()),
            user: Some("alice".to_string()),
            ..QueryFilters::default()
        };
        assert_eq!(
            filters.where_clause_for(EventKind::SlowQuery),
            "WHERE database = 'shop' AND username = 'alice' AND ts_epoch >= 10"
        );
        assert_eq!(
            filters.where_clause_for(EventKind::Auth),
            "WHERE coalesce(database, 'unknown') = 'shop' AND \"user\" = 'alice' AND ts_epoch >= 10"
        );
        // Connections have neither column
        assert_eq!(
            filters.where_clause_for(EventKind::Connection),
            "WHERE ts_epoch >= 10"
        );
    }

    #[test]
    fn test_grouping_parse() {
        assert_eq!(
            SlowQueryGrouping::parse("PATTERN_KEY"),
            Some(SlowQueryGrouping::PatternKey)
        );
        assert_eq!(SlowQueryGrouping::parse("bogus"), None);
    }

    #[test]
    fn test_cache_keys_distinguish_filters() {
        let a = QueryFilters {
            start_ts: Some(1),
            ..QueryFilters::default()
        };
        let b = QueryFilters {
            end_ts: Some(1),
            ..QueryFilters::default()
        };
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
