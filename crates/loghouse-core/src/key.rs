//! Record Key Derivation
//!
//! A record key is a deterministic, content-derived identifier used to
//! correlate a normalized event with its raw source occurrences across time
//! and re-ingests. Two structurally identical events must always produce the
//! same key, so the derivation only looks at query *shape* (operation,
//! filtered field names, pipeline stages, sort spec), never at volatile
//! values like timestamps or literals.
//!
//! Slow queries reuse the server-provided `queryHash` when the log line
//! carries one; otherwise a synthetic structural key is derived from the
//! command document. Auth and connection events key on their identifying
//! field tuple.

use std::collections::BTreeSet;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-truncated SHA-256 over the normalized structure string.
fn digest(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let out = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in out.iter().take(16) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Key for a slow-query event. Prefers the server's own `queryHash`.
pub fn slow_query_key(
    server_hash: Option<&str>,
    database: &str,
    collection: &str,
    query_text: &str,
) -> String {
    if let Some(hash) = server_hash {
        if !hash.is_empty() {
            return hash.to_string();
        }
    }
    synthetic_query_key(database, collection, query_text)
}

/// Key for an authentication event: user, database, mechanism, outcome.
pub fn auth_key(
    user: Option<&str>,
    database: Option<&str>,
    mechanism: Option<&str>,
    result: &str,
) -> String {
    let normalized = format!(
        "auth|{}|{}|{}|{}",
        user.unwrap_or("unknown"),
        database.unwrap_or("unknown"),
        mechanism.unwrap_or("unknown"),
        result,
    );
    digest(&normalized)
}

/// Key for a connection lifecycle event: state, remote endpoint, app.
pub fn connection_key(event: &str, remote: Option<&str>, app_name: Option<&str>) -> String {
    let normalized = format!(
        "conn|{}|{}|{}",
        event,
        remote.unwrap_or("unknown"),
        app_name.unwrap_or("unknown"),
    );
    digest(&normalized)
}

/// Synthetic structural key for slow queries lacking a server hash.
///
/// Builds a normalized description of the command shape and hashes it.
fn synthetic_query_key(database: &str, collection: &str, query_text: &str) -> String {
    let db = if database.is_empty() { "unknown" } else { database };
    let coll = if collection.is_empty() { "unknown" } else { collection };

    let mut parts: Vec<String> = vec![format!("{}.{}", db, coll)];
    let trimmed = query_text.trim();

    if trimmed.is_empty() {
        parts.push("query:unknown".to_string());
    } else if trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(obj)) => {
                describe_command(&obj, &mut parts);
            }
            _ => parts.push(normalize_text_query(trimmed)),
        }
    } else {
        parts.push(normalize_text_query(trimmed));
    }

    let normalized: String = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    digest(&normalized)
}

const COMMAND_OPS: [&str; 6] = ["find", "aggregate", "update", "delete", "insert", "command"];

fn describe_command(obj: &serde_json::Map<String, Value>, parts: &mut Vec<String>) {
    let mut op_found = false;
    for op in COMMAND_OPS {
        if obj.contains_key(op) {
            parts.push(format!("op:{}", op));
            op_found = true;
            break;
        }
    }
    if !op_found {
        parts.push("op:filter".to_string());
        let keys = extract_structure(&Value::Object(obj.clone()), 0);
        if !keys.is_empty() {
            parts.push(format!("filter:{}", join_sorted(&keys)));
        }
    }

    if let Some(filter) = obj.get("filter") {
        let keys = extract_structure(filter, 0);
        if !keys.is_empty() {
            parts.push(format!("filter:{}", join_sorted(&keys)));
        }
    }

    if let Some(Value::Array(pipeline)) = obj.get("pipeline") {
        let mut ops: Vec<String> = Vec::new();
        let mut sort_parts: Vec<String> = Vec::new();
        let mut match_fields: BTreeSet<String> = BTreeSet::new();
        for stage in pipeline {
            let Value::Object(stage) = stage else { continue };
            for op in stage.keys() {
                if op.starts_with('$') {
                    ops.push(op.clone());
                }
            }
            if let Some(Value::Object(sort)) = stage.get("$sort") {
                for (field, direction) in sort {
                    let dir = direction.as_i64().unwrap_or(1);
                    sort_parts.push(format!("{}:{}", field, dir));
                }
            }
            if let Some(matcher @ Value::Object(_)) = stage.get("$match") {
                match_fields.extend(extract_structure(matcher, 0));
            }
        }
        if !ops.is_empty() {
            parts.push(format!("pipeline:{}", ops.join(",")));
        }
        if !sort_parts.is_empty() {
            parts.push(format!("pipeline_sort:{}", sort_parts.join(",")));
        }
        if !match_fields.is_empty() {
            parts.push(format!("pipeline_match:{}", join_sorted(&match_fields)));
        }
    }

    if let Some(Value::Array(updates)) = obj.get("updates") {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for update in updates {
            if let Some(q) = update.get("q") {
                keys.extend(extract_structure(q, 0));
            }
        }
        if !keys.is_empty() {
            parts.push(format!("updates_filter:{}", join_sorted(&keys)));
        }
    }

    if let Some(Value::Array(deletes)) = obj.get("deletes") {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for delete in deletes {
            if let Some(q) = delete.get("q") {
                keys.extend(extract_structure(q, 0));
            }
        }
        if !keys.is_empty() {
            parts.push(format!("deletes_filter:{}", join_sorted(&keys)));
        }
    }

    if let Some(Value::Object(sort)) = obj.get("sort") {
        let mut sort_parts: Vec<String> = Vec::new();
        for (field, direction) in sort {
            let dir = direction.as_i64().unwrap_or(1);
            sort_parts.push(format!("{}:{}", field, dir));
        }
        if !sort_parts.is_empty() {
            parts.push(format!("sort:{}", sort_parts.join(",")));
        }
    }
}

/// Collect filtered field names from a query document, depth-limited so
/// deeply nested literals don't bleed into the key.
fn extract_structure(filter: &Value, depth: usize) -> BTreeSet<String> {
    const MAX_DEPTH: usize = 2;
    let mut fields = BTreeSet::new();
    if depth >= MAX_DEPTH {
        return fields;
    }
    let Value::Object(obj) = filter else {
        return fields;
    };
    for (key, value) in obj {
        if !key.starts_with('$') {
            fields.insert(key.clone());
        }
        match value {
            Value::Object(_) => {
                fields.extend(extract_structure(value, depth + 1));
            }
            Value::Array(items) => {
                for item in items {
                    if item.is_object() {
                        fields.extend(extract_structure(item, depth + 1));
                    }
                }
            }
            _ => {}
        }
    }
    fields
}

fn normalize_text_query(query_text: &str) -> String {
    let lowered = query_text.to_lowercase();
    if lowered.contains("slow query") {
        return "slow_query".to_string();
    }
    if let Some(pos) = lowered.find("command ") {
        let rest = &query_text[pos + "command ".len()..];
        let word: String = rest.chars().take_while(|c| c.is_alphanumeric()).collect();
        if !word.is_empty() {
            return format!("command:{}", word);
        }
    }
    let head: String = query_text.chars().take(50).collect();
    head.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join_sorted(keys: &BTreeSet<String>) -> String {
    keys.iter().cloned().collect::<Vec<_>>().join(",")
}
