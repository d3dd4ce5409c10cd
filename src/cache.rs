//! Task result cache.
//!
//! A `CacheProvider` trait over SHA-256 deterministic key derivation, key
//! format `task:<taskRef>|<METHOD>|<resolvedUrl>|<bodyHash16>`, with
//! entries carrying a fresh/stale/expired distinction for
//! stale-while-revalidate reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("cache error: {message}"))]
    Cache { message: String },

    #[snafu(display("serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub output: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub stale_ttl_ms: u64,
}

impl CacheEntry {
    /// `Fresh` until `ttl_ms` elapses, then `Stale` until `stale_ttl_ms`
    /// (an absolute ceiling on age, not a duration added on top of
    /// `ttl_ms`), then `Expired` (the stale-while-revalidate window).
    #[must_use]
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let age_ms = (now - self.cached_at).num_milliseconds().max(0) as u64;
        if age_ms <= self.ttl_ms {
            Freshness::Fresh
        } else if age_ms <= self.stale_ttl_ms {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Pluggable cache backend for idempotent HTTP task results.
#[async_trait]
pub trait TaskCache: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn set(&self, entry: CacheEntry) -> Result<()>;
    async fn invalidate(&self, key: &str) -> Result<()>;
}

/// `task:<taskRef>|<METHOD>|<resolvedUrl>|<bodyHash16>`. The
/// body hash is the first 16 hex characters of its SHA-256 digest; an
/// absent body hashes the empty string, so GETs with no body still produce
/// a stable key.
#[must_use]
pub fn compute_cache_key(
    task_ref: &str,
    method: &str,
    resolved_url: &str,
    body: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    let body_hash16 = format!("{digest:x}")[..16].to_string();
    format!(
        "task:{task_ref}|{}|{resolved_url}|{body_hash16}",
        method.to_uppercase()
    )
}
