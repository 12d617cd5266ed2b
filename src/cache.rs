//! C2: TTL-aware, byte-size-bounded LRU cache with RFC 2308 negative caching.
//!
//! Entries live in a [`DashMap`] for lock-striped concurrent access; LRU
//! order is tracked separately under a single `parking_lot::Mutex`, the same
//! split the cache's production counterpart uses — the map gives lock-free
//! reads under normal contention, the order list gives O(1) eviction choice.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use rustc_hash::FxBuildHasher;

use crate::dns::message::Message;
use crate::dns::resource::ResourceRecord;
use crate::dns::types::{RecordClass, RecordType};
use crate::error::{DnsError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl CacheKey {
    pub fn new(name: &str, qtype: RecordType, qclass: RecordClass) -> Self {
        CacheKey {
            name: name.to_ascii_lowercase(),
            qtype: qtype.into(),
            qclass: qclass.into(),
        }
    }

    pub fn from_question(question: &crate::dns::question::Question) -> Self {
        CacheKey::new(&question.name, question.qtype, question.qclass)
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub response: Message,
    pub insertion: Instant,
    pub expiry: Instant,
    pub original_ttl: u32,
    pub size_bytes: usize,
    pub negative: bool,
    pub hit_count: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }

    /// Builds the response handed back to a caller on a hit: TTLs rewritten
    /// down by elapsed time so a client never sees a TTL larger than what it
    /// would have seen at insertion (P2).
    fn response_at(&self, now: Instant) -> Message {
        let elapsed = now.saturating_duration_since(self.insertion).as_secs() as u32;
        let mut response = self.response.clone();
        for rr in response.answers.iter_mut() {
            rr.ttl = rr.ttl.saturating_sub(elapsed).max(1);
        }
        response
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expired_evictions: AtomicU64,
    pub negative_hits: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_evictions: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
}

/// One disk-persisted entry. Stores the response in wire format rather than
/// re-deriving `rkyv::Archive` across the whole `dns` module — the cache
/// already has a codec that round-trips a `Message` to bytes, so persistence
/// reuses it instead of duplicating it.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
struct PersistedEntry {
    name: String,
    qtype: u16,
    qclass: u16,
    response_bytes: Vec<u8>,
    expiry_unix_secs: i64,
}

#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
struct CacheSnapshot {
    entries: Vec<PersistedEntry>,
    snapshot_unix_secs: i64,
}

pub struct Cache {
    entries: DashMap<CacheKey, CacheEntry, FxBuildHasher>,
    order: Mutex<VecDeque<CacheKey>>,
    size_bytes: AtomicUsize,
    max_size_bytes: usize,
    min_ttl: u32,
    max_ttl: u32,
    negative_ttl: u32,
    stats: CacheStats,
}

impl Cache {
    pub fn new(max_size_bytes: usize, min_ttl: u32, max_ttl: u32, negative_ttl: u32) -> Self {
        Cache {
            entries: DashMap::default(),
            order: Mutex::new(VecDeque::new()),
            size_bytes: AtomicUsize::new(0),
            max_size_bytes,
            min_ttl,
            max_ttl,
            negative_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Lookup(key, now): returns a live hit, rewriting RR TTLs down by
    /// elapsed time, or lazily evicts an expired entry and reports a miss.
    pub fn lookup(&self, key: &CacheKey, now: Instant) -> Option<Message> {
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                if entry.negative {
                    self.stats.negative_hits.fetch_add(1, Ordering::Relaxed);
                }
                Some(entry.response_at(now))
            }
            Some(_) => None,
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match hit {
            Some(response) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(key);
                Some(response)
            }
            None => {
                self.remove(key);
                self.stats.expired_evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert(key, response, now): computes the effective TTL per §4.2,
    /// evicts LRU entries until the byte budget is satisfied, then inserts
    /// as most-recently-used. A zero effective TTL, or a SERVFAIL response,
    /// is never cached. Returns the number of LRU evictions the insert
    /// triggered, so a caller can publish a `cache.evicted` event (§4.9)
    /// without the cache needing to hold a handle to the event bus itself.
    pub fn insert(&self, key: CacheKey, response: Message, now: Instant) -> Result<usize> {
        if response.header.rcode == crate::constants::Rcode::SERVFAIL {
            return Ok(0);
        }

        let negative = is_negative_response(&response);
        let effective_ttl = if negative {
            let soa = response.soa_minimum.unwrap_or(self.negative_ttl);
            self.negative_ttl.min(soa)
        } else {
            let min_answer_ttl = response
                .answers
                .iter()
                .map(|rr| rr.ttl)
                .min()
                .unwrap_or(0);
            min_answer_ttl.clamp(self.min_ttl, self.max_ttl)
        };

        if effective_ttl == 0 {
            return Ok(0);
        }

        let (size_bytes, _) = response.serialize(None)?;
        let size_bytes = size_bytes.len();

        let evicted = self.evict_until_fits(size_bytes);

        let entry = CacheEntry {
            response,
            insertion: now,
            expiry: now + Duration::from_secs(effective_ttl as u64),
            original_ttl: effective_ttl,
            size_bytes,
            negative,
            hit_count: AtomicU64::new(0),
        };

        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.size_bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        self.touch(&key);
        Ok(evicted)
    }

    /// Invalidate(predicate): drops every entry whose key matches.
    pub fn invalidate(&self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let matching: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| e.key().clone())
            .collect();
        let count = matching.len();
        for key in matching {
            self.remove(&key);
        }
        count
    }

    /// Flush(): removes only entries that have already expired.
    pub fn flush(&self, now: Instant) -> usize {
        self.invalidate_if(|_, entry| entry.is_expired(now))
    }

    /// Clear(): removes everything.
    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expired_evictions: self.stats.expired_evictions.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots every live (non-expired) entry to `path`, per §4.2's
    /// persistence supplement. Writes through a temp file and renames into
    /// place so a crash mid-write can never leave a half-written file for a
    /// later `load_from_disk` to choke on.
    pub async fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<usize> {
        let now = Instant::now();
        let wall_now = Utc::now().timestamp();

        let mut entries = Vec::new();
        for item in self.entries.iter() {
            let entry = item.value();
            if entry.is_expired(now) {
                continue;
            }
            let (response_bytes, _) = entry.response.serialize(None)?;
            let remaining = entry.expiry.saturating_duration_since(now).as_secs() as i64;
            entries.push(PersistedEntry {
                name: item.key().name.clone(),
                qtype: item.key().qtype,
                qclass: item.key().qclass,
                response_bytes,
                expiry_unix_secs: wall_now + remaining,
            });
        }

        let snapshot_len = entries.len();
        let snapshot = CacheSnapshot { entries, snapshot_unix_secs: wall_now };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&snapshot)
            .map_err(|e| DnsError::Config(format!("cache snapshot serialization failed: {e}")))?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        Ok(snapshot_len)
    }

    /// Loads a snapshot written by [`save_to_disk`](Self::save_to_disk),
    /// discarding anything already expired by wall-clock comparison. A
    /// missing file is not an error: a cold cache on startup is always a
    /// legal starting state.
    pub async fn load_from_disk(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Ok(0);
        }
        let bytes = tokio::fs::read(path).await?;
        let snapshot = rkyv::from_bytes::<CacheSnapshot, rkyv::rancor::Error>(&bytes)
            .map_err(|e| DnsError::Config(format!("cache snapshot deserialization failed: {e}")))?;

        let wall_now = Utc::now().timestamp();
        let now = Instant::now();
        let mut loaded = 0;
        for entry in snapshot.entries {
            let remaining = entry.expiry_unix_secs - wall_now;
            if remaining <= 0 {
                continue;
            }
            let Ok(response) = Message::parse(&entry.response_bytes) else {
                continue;
            };
            let size_bytes = entry.response_bytes.len();
            let negative = is_negative_response(&response);
            let key = CacheKey { name: entry.name, qtype: entry.qtype, qclass: entry.qclass };
            let cache_entry = CacheEntry {
                response,
                insertion: now,
                expiry: now + Duration::from_secs(remaining as u64),
                original_ttl: remaining as u32,
                size_bytes,
                negative,
                hit_count: AtomicU64::new(0),
            };

            self.evict_until_fits(size_bytes);
            self.entries.insert(key.clone(), cache_entry);
            self.size_bytes.fetch_add(size_bytes, Ordering::Relaxed);
            self.touch(&key);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn invalidate_if(&self, mut predicate: impl FnMut(&CacheKey, &CacheEntry) -> bool) -> usize {
        let matching: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| predicate(e.key(), e.value()))
            .map(|e| e.key().clone())
            .collect();
        let count = matching.len();
        for key in &matching {
            self.remove(key);
        }
        count
    }

    fn remove(&self, key: &CacheKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.size_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        self.order.lock().retain(|k| k != key);
    }

    fn touch(&self, key: &CacheKey) {
        let mut order = self.order.lock();
        order.retain(|k| k != key);
        order.push_back(key.clone());
    }

    fn evict_until_fits(&self, incoming_size: usize) -> usize {
        let mut evicted = 0;
        while self.size_bytes.load(Ordering::Relaxed) + incoming_size > self.max_size_bytes {
            let victim = {
                let mut order = self.order.lock();
                order.pop_front()
            };
            match victim {
                Some(key) => {
                    if let Some((_, entry)) = self.entries.remove(&key) {
                        self.size_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }
}

pub(crate) fn is_negative_response(response: &Message) -> bool {
    if response.header.rcode == crate::constants::Rcode::NXDOMAIN {
        return true;
    }
    response.header.rcode == crate::constants::Rcode::NOERROR && response.answers.is_empty()
}

pub fn soa_record(name: &str, ttl: u32, minimum: u32) -> ResourceRecord {
    // Used only by tests to build a synthetic SOA authority record.
    let mut rdata = Vec::new();
    rdata.push(0); // MNAME: root (tests don't need a real name)
    rdata.push(0); // RNAME: root
    rdata.extend_from_slice(&0u32.to_be_bytes()); // serial
    rdata.extend_from_slice(&0u32.to_be_bytes()); // refresh
    rdata.extend_from_slice(&0u32.to_be_bytes()); // retry
    rdata.extend_from_slice(&0u32.to_be_bytes()); // expire
    rdata.extend_from_slice(&minimum.to_be_bytes());
    ResourceRecord {
        name: name.to_string(),
        rtype: RecordType::SOA,
        rclass: RecordClass::IN,
        ttl,
        rdata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::header::Header;
    use crate::dns::question::Question;
    use std::net::Ipv4Addr;

    fn make_response(id: u16, rcode: u8, answers: Vec<ResourceRecord>) -> Message {
        Message {
            header: Header {
                id,
                qr: true,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: true,
                z: 0,
                rcode,
                qdcount: 1,
                ancount: answers.len() as u16,
                nscount: 0,
                arcount: 0,
            },
            questions: vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass: RecordClass::IN,
            }],
            answers,
            authorities: Vec::new(),
            additional: Vec::new(),
            soa_minimum: None,
        }
    }

    #[test]
    fn insert_then_lookup_hits() {
        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let key = CacheKey::new("example.com", RecordType::A, RecordClass::IN);
        let now = Instant::now();
        let response = make_response(
            1,
            0,
            vec![ResourceRecord::new_a("example.com", 3600, Ipv4Addr::new(93, 184, 216, 34))],
        );
        cache.insert(key.clone(), response, now).unwrap();

        let hit = cache.lookup(&key, now + Duration::from_secs(1)).unwrap();
        assert_eq!(hit.answers[0].ttl, 3599);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_evicted() {
        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let key = CacheKey::new("example.com", RecordType::A, RecordClass::IN);
        let now = Instant::now();
        let response = make_response(
            1,
            0,
            vec![ResourceRecord::new_a("example.com", 1, Ipv4Addr::new(1, 1, 1, 1))],
        );
        cache.insert(key.clone(), response, now).unwrap();
        assert!(cache.lookup(&key, now + Duration::from_secs(5)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn negative_response_uses_soa_minimum() {
        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let key = CacheKey::new("no-such-domain.example", RecordType::A, RecordClass::IN);
        let now = Instant::now();
        let mut response = make_response(1, crate::constants::Rcode::NXDOMAIN, Vec::new());
        response.soa_minimum = Some(120);
        cache.insert(key.clone(), response, now).unwrap();

        let hit = cache.lookup(&key, now + Duration::from_secs(1)).unwrap();
        assert_eq!(hit.header.rcode, crate::constants::Rcode::NXDOMAIN);
        assert!(cache.lookup(&key, now + Duration::from_secs(121)).is_none());
    }

    #[test]
    fn servfail_is_never_cached() {
        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let key = CacheKey::new("example.com", RecordType::A, RecordClass::IN);
        let now = Instant::now();
        let response = make_response(1, crate::constants::Rcode::SERVFAIL, Vec::new());
        cache.insert(key.clone(), response, now).unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn save_and_load_round_trips_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.rkyv");

        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let key = CacheKey::new("example.com", RecordType::A, RecordClass::IN);
        let now = Instant::now();
        let response = make_response(
            1,
            0,
            vec![ResourceRecord::new_a("example.com", 3600, Ipv4Addr::new(93, 184, 216, 34))],
        );
        cache.insert(key.clone(), response, now).unwrap();
        assert_eq!(cache.save_to_disk(&path).await.unwrap(), 1);

        let reloaded = Cache::new(1_000_000, 0, 86400, 300);
        assert_eq!(reloaded.load_from_disk(&path).await.unwrap(), 1);
        assert!(reloaded.lookup(&key, Instant::now()).is_some());
    }

    #[tokio::test]
    async fn load_from_missing_path_is_not_an_error() {
        let cache = Cache::new(1_000_000, 0, 86400, 300);
        let loaded = cache.load_from_disk("/nonexistent/wayfind-cache-test.rkyv").await.unwrap();
        assert_eq!(loaded, 0);
    }

    #[test]
    fn byte_size_bound_evicts_lru() {
        let mut sized = 0usize;
        let probe = make_response(
            1,
            0,
            vec![ResourceRecord::new_a("a.example", 60, Ipv4Addr::new(1, 1, 1, 1))],
        );
        sized = probe.serialize(None).unwrap().0.len();
        let cache = Cache::new(sized * 2, 0, 86400, 300);
        let now = Instant::now();

        for i in 0..5u8 {
            let name = format!("{i}.example");
            let key = CacheKey::new(&name, RecordType::A, RecordClass::IN);
            let response = make_response(
                1,
                0,
                vec![ResourceRecord::new_a(name.clone(), 60, Ipv4Addr::new(i, i, i, i))],
            );
            cache.insert(key, response, now).unwrap();
        }

        assert!(cache.stats().size_bytes <= sized * 2);
        assert!(cache.stats().evictions > 0);
    }
}
