//! Dataset Settings
//!
//! Runtime configuration for ingest and query. Settings can be built from
//! the `LOGHOUSE_*` environment variables or deserialized from JSON; every
//! field has a default so a bare `Settings::default()` is a working
//! configuration pointed at `./loghouse_data`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_out_root() -> PathBuf {
    PathBuf::from("loghouse_data")
}

fn default_chunk_rows() -> usize {
    50_000
}

fn default_chunk_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_lock_stale_after_secs() -> u64 {
    3600
}

/// Parquet compression codec for partition and index files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    Snappy,
    Zstd,
    None,
}

impl Default for CompressionCodec {
    fn default() -> Self {
        CompressionCodec::Snappy
    }
}

impl CompressionCodec {
    /// Parse a codec name, falling back to Snappy for unknown values.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "zstd" => CompressionCodec::Zstd,
            "none" | "uncompressed" => CompressionCodec::None,
            _ => CompressionCodec::Snappy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionCodec::Snappy => "snappy",
            CompressionCodec::Zstd => "zstd",
            CompressionCodec::None => "none",
        }
    }
}

/// Top-level settings shared by the ingest and query paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory of the dataset on disk.
    #[serde(default = "default_out_root")]
    pub out_root: PathBuf,
    /// Compression applied to every Parquet file written.
    #[serde(default)]
    pub parquet_compression: CompressionCodec,
    /// Rows buffered per kind before a partition chunk is flushed.
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    /// Approximate in-memory bytes per kind before an early flush.
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    /// Copy ingested source files under the dataset's `source/` directory.
    #[serde(default)]
    pub keep_source_copy: bool,
    /// Refuse analytic queries instead of running the SQL engine.
    #[serde(default)]
    pub disable_engine: bool,
    /// Age after which an ingest lock from a dead process may be broken.
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            out_root: default_out_root(),
            parquet_compression: CompressionCodec::default(),
            chunk_rows: default_chunk_rows(),
            chunk_bytes: default_chunk_bytes(),
            keep_source_copy: false,
            disable_engine: false,
            lock_stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

impl Settings {
    /// Build settings from `LOGHOUSE_*` environment variables, with
    /// defaults for anything unset. Unparsable numeric values fall back to
    /// their defaults rather than failing startup.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(root) = std::env::var("LOGHOUSE_OUT_ROOT") {
            if !root.is_empty() {
                settings.out_root = PathBuf::from(root);
            }
        }
        if let Ok(codec) = std::env::var("LOGHOUSE_PARQUET_COMPRESSION") {
            settings.parquet_compression = CompressionCodec::parse(&codec);
        }
        if let Ok(rows) = std::env::var("LOGHOUSE_CHUNK_ROWS") {
            if let Ok(rows) = rows.parse::<usize>() {
                if rows > 0 {
                    settings.chunk_rows = rows;
                }
            }
        }
        if let Ok(bytes) = std::env::var("LOGHOUSE_CHUNK_BYTES") {
            if let Ok(bytes) = bytes.parse::<usize>() {
                if bytes > 0 {
                    settings.chunk_bytes = bytes;
                }
            }
        }
        if let Ok(keep) = std::env::var("LOGHOUSE_KEEP_SOURCE_COPY") {
            settings.keep_source_copy = parse_bool(&keep, settings.keep_source_copy);
        }
        if let Ok(disable) = std::env::var("LOGHOUSE_DISABLE_ENGINE") {
            settings.disable_engine = parse_bool(&disable, settings.disable_engine);
        }
        if let Ok(secs) = std::env::var("LOGHOUSE_LOCK_STALE_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                settings.lock_stale_after_secs = secs;
            }
        }
        settings
    }
}

fn parse_bool(value: &str, fallback: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}
