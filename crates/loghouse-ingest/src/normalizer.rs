//! Log Line Normalization
//!
//! Structured database logs are newline-delimited JSON. The normalizer
//! classifies each line into one of three event kinds, or skips it:
//!
//! - `msg` contains "slow query": a slow-query event.
//! - `msg` contains "connection accepted" / "connection ended": a
//!   connection lifecycle event.
//! - component `c == "ACCESS"` with an auth outcome message: an
//!   authentication event.
//!
//! Lines that are blank or do not start with `{` are skipped silently
//! (startup banners, stack traces). Lines that look like JSON but fail to
//! parse count as malformed. A parsed line without a `t.$date` timestamp
//! is dropped and counted separately. A timestamp that is present but
//! unparsable keeps the raw string with epoch 0 rather than losing the
//! event.
//!
//! Every produced event carries the byte span of its source line so the
//! raw text can be retrieved later without re-parsing the file.

use loghouse_core::event::{
    AuthEvent, ConnectionEvent, EventKind, NormalizedEvent, RawSpan, SlowQueryEvent,
};
use loghouse_core::key;
use serde_json::Value;

/// Classification of one input line.
#[derive(Debug)]
pub enum LineOutcome {
    /// The line produced a normalized event.
    Event(NormalizedEvent),
    /// Blank, non-JSON, or JSON of no interest.
    Skipped,
    /// Starts with `{` but is not valid JSON.
    Malformed,
    /// Valid JSON with no `t.$date` field.
    MissingTimestamp,
}

/// Per-run counters, folded into the ingest report.
#[derive(Debug, Default, Clone)]
pub struct NormalizerStats {
    pub lines: u64,
    pub slow_queries: u64,
    pub authentications: u64,
    pub connections: u64,
    pub skipped: u64,
    pub malformed: u64,
    pub missing_timestamp: u64,
}

impl NormalizerStats {
    pub fn events(&self) -> u64 {
        self.slow_queries + self.authentications + self.connections
    }

    pub fn record(&mut self, outcome: &LineOutcome) {
        self.lines += 1;
        match outcome {
            LineOutcome::Event(event) => match event.kind() {
                EventKind::SlowQuery => self.slow_queries += 1,
                EventKind::Auth => self.authentications += 1,
                EventKind::Connection => self.connections += 1,
            },
            LineOutcome::Skipped => self.skipped += 1,
            LineOutcome::Malformed => self.malformed += 1,
            LineOutcome::MissingTimestamp => self.missing_timestamp += 1,
        }
    }
}

/// Stateless per-line normalizer bound to one registered source file.
pub struct Normalizer {
    file_id: u32,
}

impl Normalizer {
    pub fn new(file_id: u32) -> Self {
        Normalizer { file_id }
    }

    /// Normalize one line. `byte_offset` is the line's start within the
    /// (decompressed) source stream and `byte_length` includes the
    /// trailing newline.
    pub fn normalize_line(
        &self,
        line: &str,
        byte_offset: u64,
        byte_length: u32,
        line_number: u64,
    ) -> LineOutcome {
        let stripped = line.trim();
        if stripped.is_empty() || !stripped.starts_with('{') {
            return LineOutcome::Skipped;
        }

        let entry: Value = match serde_json::from_str(stripped) {
            Ok(value) => value,
            Err(_) => return LineOutcome::Malformed,
        };

        let timestamp_raw = match entry
            .pointer("/t/$date")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            Some(raw) => raw,
            None => return LineOutcome::MissingTimestamp,
        };
        let (timestamp, ts_epoch) = parse_timestamp(timestamp_raw);

        let span = RawSpan {
            file_id: self.file_id,
            byte_offset,
            byte_length,
        };
        let attr = entry.get("attr").and_then(Value::as_object);
        let message = entry.get("msg").and_then(Value::as_str).unwrap_or("");
        let message_lower = message.to_lowercase();
        let ctx = entry.get("ctx").and_then(Value::as_str);

        if message_lower.contains("slow query") {
            return LineOutcome::Event(self.slow_query(
                attr, ctx, timestamp, ts_epoch, span, line_number,
            ));
        }

        if message_lower.contains("connection accepted")
            || message_lower.contains("connection ended")
        {
            let state = if message_lower.contains("connection accepted") {
                "accepted"
            } else {
                "ended"
            };
            return LineOutcome::Event(self.connection(
                attr, ctx, state, timestamp, ts_epoch, span, line_number,
            ));
        }

        if entry.get("c").and_then(Value::as_str) == Some("ACCESS") {
            if let Some(result) = auth_result(&message_lower) {
                return LineOutcome::Event(self.auth(
                    attr, ctx, result, timestamp, ts_epoch, span, line_number,
                ));
            }
        }

        LineOutcome::Skipped
    }

    #[allow(clippy::too_many_arguments)]
    fn slow_query(
        &self,
        attr: Option<&serde_json::Map<String, Value>>,
        ctx: Option<&str>,
        timestamp: String,
        ts_epoch: i64,
        span: RawSpan,
        line_number: u64,
    ) -> NormalizedEvent {
        let command = attr
            .and_then(|a| a.get("command").or_else(|| a.get("commandBody")))
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        let query_text = stringify_command(&command);

        let ns = attr_str(attr, "ns").unwrap_or_default();
        let database = attr_str(attr, "db")
            .or_else(|| ns.split('.').next().map(str::to_string).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());
        let collection = attr_str(attr, "collection")
            .or_else(|| {
                ns.split('.')
                    .next_back()
                    .filter(|_| ns.contains('.'))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());
        let namespace = if ns.is_empty() {
            format!("{}.{}", database, collection)
        } else {
            ns
        };

        let server_hash = attr_str(attr, "queryHash");
        let record_key =
            key::slow_query_key(server_hash.as_deref(), &database, &collection, &query_text);

        NormalizedEvent::SlowQuery(SlowQueryEvent {
            timestamp,
            ts_epoch,
            duration_ms: attr_i64(attr, "durationMillis"),
            docs_examined: attr_i64(attr, "docsExamined"),
            docs_returned: {
                let n = attr_i64(attr, "nReturned");
                if n != 0 { n } else { attr_i64(attr, "docsReturned") }
            },
            keys_examined: attr_i64(attr, "keysExamined"),
            record_key,
            database,
            collection,
            namespace,
            plan_summary: attr_str(attr, "planSummary").unwrap_or_else(|| "None".to_string()),
            query_text,
            operation: infer_operation(attr, &command),
            connection_id: extract_connection_id(attr, ctx),
            username: attr_str(attr, "appName").or_else(|| attr_str(attr, "user")),
            span,
            line_number,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn connection(
        &self,
        attr: Option<&serde_json::Map<String, Value>>,
        ctx: Option<&str>,
        state: &str,
        timestamp: String,
        ts_epoch: i64,
        span: RawSpan,
        line_number: u64,
    ) -> NormalizedEvent {
        let remote_address = extract_remote(attr);
        let app_name = attr_str(attr, "appName");
        let record_key =
            key::connection_key(state, remote_address.as_deref(), app_name.as_deref());

        NormalizedEvent::Connection(ConnectionEvent {
            timestamp,
            ts_epoch,
            record_key,
            event: state.to_string(),
            connection_id: extract_connection_id(attr, ctx),
            remote_address,
            connection_count: attr
                .and_then(|a| a.get("connectionCount"))
                .and_then(Value::as_i64),
            app_name,
            driver: attr_str(attr, "driver"),
            span,
            line_number,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn auth(
        &self,
        attr: Option<&serde_json::Map<String, Value>>,
        ctx: Option<&str>,
        result: &str,
        timestamp: String,
        ts_epoch: i64,
        span: RawSpan,
        line_number: u64,
    ) -> NormalizedEvent {
        // `user` can be a plain string or a nested principal object.
        let raw_user = attr.and_then(|a| a.get("user"));
        let mut user: Option<String> = None;
        let mut database: Option<String> = None;
        match raw_user {
            Some(Value::Object(obj)) => {
                user = ["user", "userName", "username", "name"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map(str::to_string);
                database = ["db", "dbName", "database"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map(str::to_string);
            }
            Some(Value::String(s)) => user = Some(s.clone()),
            _ => {}
        }
        if user.is_none() {
            user = attr_str(attr, "principalName")
                .or_else(|| attr_str(attr, "principal"))
                .or_else(|| attr_str(attr, "principal_user"));
        }
        if database.is_none() {
            database = attr_str(attr, "db")
                .or_else(|| attr_str(attr, "authenticationDatabase"))
                .or_else(|| attr_str(attr, "principalDb"));
        }
        let mechanism = attr_str(attr, "mechanism").or_else(|| attr_str(attr, "mechanismName"));

        let record_key = key::auth_key(
            user.as_deref(),
            database.as_deref(),
            mechanism.as_deref(),
            result,
        );

        NormalizedEvent::Auth(AuthEvent {
            timestamp,
            ts_epoch,
            record_key,
            user,
            database,
            mechanism,
            result: result.to_string(),
            connection_id: extract_connection_id(attr, ctx),
            remote_address: extract_remote(attr),
            app_name: attr_str(attr, "appName"),
            error: attr_str(attr, "error").or_else(|| attr_str(attr, "err")),
            span,
            line_number,
        })
    }
}

/// Parse an ISO-8601 timestamp into (canonical string, unix epoch). An
/// unparsable value is kept verbatim with epoch 0.
fn parse_timestamp(raw: &str) -> (String, i64) {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return (dt.to_rfc3339(), dt.timestamp());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return (dt.to_rfc3339(), dt.timestamp());
    }
    tracing::warn!(timestamp = raw, "unparsable timestamp, keeping raw with epoch 0");
    (raw.to_string(), 0)
}

fn attr_str(attr: Option<&serde_json::Map<String, Value>>, field: &str) -> Option<String> {
    let value = attr?.get(field)?;
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null => None,
        Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn attr_i64(attr: Option<&serde_json::Map<String, Value>>, field: &str) -> i64 {
    attr.and_then(|a| a.get(field)).and_then(Value::as_i64).unwrap_or(0)
}

fn extract_remote(attr: Option<&serde_json::Map<String, Value>>) -> Option<String> {
    ["remote", "client", "remoteAddr", "remote_address"]
        .iter()
        .find_map(|k| attr_str(attr, k))
}

fn extract_connection_id(
    attr: Option<&serde_json::Map<String, Value>>,
    ctx: Option<&str>,
) -> Option<String> {
    attr_str(attr, "connectionId")
        .or_else(|| attr_str(attr, "connId"))
        .or_else(|| ctx.map(str::to_string))
}

fn auth_result(message_lower: &str) -> Option<&'static str> {
    if message_lower.contains("successfully authenticated")
        || message_lower.contains("authentication succeeded")
    {
        Some("success")
    } else if message_lower.contains("authentication failed") {
        Some("failure")
    } else {
        None
    }
}

fn stringify_command(command: &Value) -> String {
    match command {
        Value::Null => "{}".to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Best-effort operation name for a slow query.
fn infer_operation(attr: Option<&serde_json::Map<String, Value>>, command: &Value) -> String {
    if let Some(name) = attr_str(attr, "commandName") {
        return name;
    }
    if let Value::Object(command) = command {
        for op in ["find", "aggregate", "update", "delete", "insert", "getMore"] {
            if command.contains_key(op) {
                return op.to_string();
            }
        }
        if let Some(name) = command
            .get("commandName")
            .or_else(|| command.get("operation"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            return name.to_string();
        }
        if command.len() == 1 {
            if let Some(sole) = command.keys().next() {
                return sole.clone();
            }
        }
        if command.get("updates").is_some_and(Value::is_array) {
            return "update".to_string();
        }
        if command.get("deletes").is_some_and(Value::is_array) {
            return "delete".to_string();
        }
        if command.get("inserts").is_some_and(Value::is_array) {
            return "insert".to_string();
        }
        if command.contains_key("q") && command.contains_key("u") {
            return "update".to_string();
        }
    }
    if let Some(plan) = attr_str(attr, "planSummary") {
        return plan;
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2026-01-02T03:04:05.123+00:00";

    fn normalize(line: &str) -> LineOutcome {
        Normalizer::new(1).normalize_line(line, 0, line.len() as u32 + 1, 1)
    }

    fn slow_query_line() -> String {
        format!(
            r#"{{"t":{{"$date":"{TS}"}},"s":"I","c":"COMMAND","ctx":"conn12","msg":"Slow query","attr":{{"ns":"shop.orders","durationMillis":245,"docsExamined":5000,"nReturned":10,"keysExamined":100,"planSummary":"COLLSCAN","command":{{"find":"orders","filter":{{"status":"open"}}}}}}}}"#
        )
    }

    #[test]
    fn test_slow_query_extraction() {
        let LineOutcome::Event(NormalizedEvent::SlowQuery(q)) = normalize(&slow_query_line())
        else {
            panic!("expected slow query event");
        };
        assert_eq!(q.database, "shop");
        assert_eq!(q.collection, "orders");
        assert_eq!(q.namespace, "shop.orders");
        assert_eq!(q.duration_ms, 245);
        assert_eq!(q.docs_examined, 5000);
        assert_eq!(q.docs_returned, 10);
        assert_eq!(q.operation, "find");
        assert_eq!(q.plan_summary, "COLLSCAN");
        assert_eq!(q.connection_id.as_deref(), Some("conn12"));
        assert!(q.ts_epoch > 0);
        assert!(!q.record_key.is_empty());
    }

    #[test]
    fn test_server_query_hash_wins() {
        let line = format!(
            r#"{{"t":{{"$date":"{TS}"}},"c":"COMMAND","msg":"Slow query","attr":{{"ns":"a.b","queryHash":"FEED0123","command":{{"find":"b"}}}}}}"#
        );
        let LineOutcome::Event(NormalizedEvent::SlowQuery(q)) = normalize(&line) else {
            panic!("expected slow query event");
        };
        assert_eq!(q.record_key, "FEED0123");
    }

    #[test]
    fn test_connection_accepted() {
        let line = format!(
            r#"{{"t":{{"$date":"{TS}"}},"c":"NETWORK","ctx":"listener","msg":"Connection accepted","attr":{{"remote":"10.0.0.9:51234","connectionId":814,"connectionCount":42}}}}"#
        );
        let LineOutcome::Event(NormalizedEvent::Connection(c)) = normalize(&line) else {
            panic!("expected connection event");
        };
        assert_eq!(c.event, "accepted");
        assert_eq!(c.remote_address.as_deref(), Some("10.0.0.9:51234"));
        assert_eq!(c.connection_id.as_deref(), Some("814"));
        assert_eq!(c.connection_count, Some(42));
    }

    #[test]
    fn test_auth_failure_with_nested_user() {
        let line = format!(
            r#"{{"t":{{"$date":"{TS}"}},"c":"ACCESS","ctx":"conn3","msg":"Authentication failed","attr":{{"user":{{"user":"alice","db":"admin"}},"mechanism":"SCRAM-SHA-256","remote":"10.0.0.9:51234","error":"AuthenticationFailed"}}}}"#
        );
        let LineOutcome::Event(NormalizedEvent::Auth(a)) = normalize(&line) else {
            panic!("expected auth event");
        };
        assert_eq!(a.result, "failure");
        assert_eq!(a.user.as_deref(), Some("alice"));
        assert_eq!(a.database.as_deref(), Some("admin"));
        assert_eq!(a.mechanism.as_deref(), Some("SCRAM-SHA-256"));
        assert_eq!(a.error.as_deref(), Some("AuthenticationFailed"));
    }

    #[test]
    fn test_access_without_auth_message_skipped() {
        let line = format!(
            r#"{{"t":{{"$date":"{TS}"}},"c":"ACCESS","msg":"Checking authorization","attr":{{}}}}"#
        );
        assert!(matches!(normalize(&line), LineOutcome::Skipped));
    }

    #[test]
    fn test_non_json_lines_skipped() {
        assert!(matches!(normalize(""), LineOutcome::Skipped));
        assert!(matches!(normalize("   "), LineOutcome::Skipped));
        assert!(matches!(
            normalize("mongod starting up, pid=1"),
            LineOutcome::Skipped
        ));
    }

    #[test]
    fn test_bad_json_is_malformed() {
        assert!(matches!(
            normalize(r#"{"t": {"$date": "2026-"#),
            LineOutcome::Malformed
        ));
    }

    #[test]
    fn test_missing_timestamp_dropped() {
        let line = r#"{"s":"I","c":"COMMAND","msg":"Slow query","attr":{}}"#;
        assert!(matches!(normalize(line), LineOutcome::MissingTimestamp));
    }

    #[test]
    fn test_unparsable_timestamp_kept_with_zero_epoch() {
        let line = r#"{"t":{"$date":"not-a-date"},"c":"COMMAND","msg":"Slow query","attr":{"ns":"a.b"}}"#;
        let LineOutcome::Event(NormalizedEvent::SlowQuery(q)) = normalize(line) else {
            panic!("expected slow query event");
        };
        assert_eq!(q.ts_epoch, 0);
        assert_eq!(q.timestamp, "not-a-date");
    }

    #[test]
    fn test_namespace_fallbacks() {
        let line = format!(
            r#"{{"t":{{"$date":"{TS}"}},"c":"COMMAND","msg":"Slow query","attr":{{"command":{{"getMore":1234}}}}}}"#
        );
        let LineOutcome::Event(NormalizedEvent::SlowQuery(q)) = normalize(&line) else {
            panic!("expected slow query event");
        };
        assert_eq!(q.database, "unknown");
        assert_eq!(q.collection, "unknown");
        assert_eq!(q.namespace, "unknown.unknown");
        assert_eq!(q.operation, "getMore");
    }

    #[test]
    fn test_stats_counters() {
        let normalizer = Normalizer::new(1);
        let mut stats = NormalizerStats::default();
        let lines = [
            slow_query_line(),
            "not json".to_string(),
            "{broken".to_string(),
            r#"{"msg":"Slow query"}"#.to_string(),
        ];
        for (i, line) in lines.iter().enumerate() {
            let outcome = normalizer.normalize_line(line, 0, line.len() as u32, i as u64 + 1);
            stats.record(&outcome);
        }
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.slow_queries, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.missing_timestamp, 1);
        assert_eq!(stats.events(), 1);
    }
}
