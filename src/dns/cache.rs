//! DNS response cache
//!
//! In-memory TTL cache keyed by (lower-cased name, query type). Entries
//! expire by the minimum answer-record TTL of the cached response.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use tokio::sync::RwLock;

use super::message::{DnsQuery, DnsResponse};

/// Cache key for DNS queries
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub name: String,
    pub query_type: RecordType,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, query_type: RecordType) -> Self {
        Self {
            name: name.into().to_lowercase(),
            query_type,
        }
    }

    pub fn from_query(query: &DnsQuery) -> Self {
        Self::new(&query.name, query.query_type)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: DnsResponse,
    expires_at: Instant,
    created_at: Instant,
}

impl CacheEntry {
    fn new(response: DnsResponse, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            response,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// TTL cache for forwarded DNS responses
pub struct DnsCache {
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    stats: RwLock<CacheStats>,
}

impl DnsCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Get a cached response; expired entries count as misses
    pub async fn get(&self, key: &CacheKey) -> Option<DnsResponse> {
        let cache = self.cache.read().await;
        if let Some(entry) = cache.get(key) {
            if !entry.is_expired() {
                let mut stats = self.stats.write().await;
                stats.hits += 1;
                return Some(entry.response.clone());
            }
        }
        drop(cache);

        let mut stats = self.stats.write().await;
        stats.misses += 1;
        None
    }

    /// Cache a response. Only successful responses that carry answers are
    /// worth keeping; everything else is ignored.
    pub async fn insert(&self, key: CacheKey, response: DnsResponse) {
        if response.response_code != ResponseCode::NoError || response.answers.is_empty() {
            return;
        }

        let ttl = response
            .answers
            .iter()
            .map(|a| a.ttl)
            .min()
            .unwrap_or(0);
        if ttl == 0 {
            return;
        }

        let mut cache = self.cache.write().await;
        if cache.len() >= self.max_entries {
            cache.retain(|_, entry| !entry.is_expired());
        }
        if cache.len() >= self.max_entries {
            // still full, drop the oldest entry
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone())
            {
                cache.remove(&oldest);
            }
        }

        cache.insert(key, CacheEntry::new(response, Duration::from_secs(ttl as u64)));

        let mut stats = self.stats.write().await;
        stats.entries = cache.len();
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        let mut stats = self.stats.write().await;
        stats.entries = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        let mut stats = self.stats.read().await.clone();
        stats.entries = cache.len();
        stats
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::{AnswerRecord, RecordData};

    fn response_with_answer(id: u16, ttl: u32) -> DnsResponse {
        let mut response = DnsResponse::new(id);
        response.add_answer(AnswerRecord::new(
            "cached.example.com",
            RecordData::A("1.2.3.4".parse().unwrap()),
            ttl,
        ));
        response
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = DnsCache::new();
        let key = CacheKey::new("cached.example.com", RecordType::A);

        cache.insert(key.clone(), response_with_answer(42, 300)).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.answers.len(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_key_is_case_insensitive() {
        let cache = DnsCache::new();
        cache
            .insert(
                CacheKey::new("Cached.Example.COM", RecordType::A),
                response_with_answer(1, 300),
            )
            .await;

        let hit = cache
            .get(&CacheKey::new("cached.example.com", RecordType::A))
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_miss_for_unknown_key() {
        let cache = DnsCache::new();
        let miss = cache
            .get(&CacheKey::new("unknown.example.com", RecordType::A))
            .await;
        assert!(miss.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_empty_and_failed_responses_not_cached() {
        let cache = DnsCache::new();

        cache
            .insert(
                CacheKey::new("empty.example.com", RecordType::A),
                DnsResponse::new(1),
            )
            .await;
        cache
            .insert(
                CacheKey::new("fail.example.com", RecordType::A),
                DnsResponse::servfail(2),
            )
            .await;

        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let cache = DnsCache::with_max_entries(2);

        for i in 0..3u16 {
            cache
                .insert(
                    CacheKey::new(format!("host{i}.example.com"), RecordType::A),
                    response_with_answer(i, 300),
                )
                .await;
        }

        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = DnsCache::new();
        cache
            .insert(
                CacheKey::new("host.example.com", RecordType::A),
                response_with_answer(1, 300),
            )
            .await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entries, 0);
    }
}
