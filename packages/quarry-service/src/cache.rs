//! Bounded in-memory cache in front of the store and the merger.
//!
//! Two stores share one mechanics and one byte budget: search outcomes keyed
//! by a request hash, raw chunk sets keyed by document id. Entries are
//! immutable once inserted; a lost race costs one extra miss, never a wrong
//! result. The clock is always passed in, so tests own time.

use std::{collections::HashMap, sync::Mutex};

use time::{Duration, OffsetDateTime};

use quarry_storage::models::Chunk;

use crate::search::SearchOutcome;

#[derive(Clone, Copy, Debug)]
enum CacheKind {
	Result,
	Chunk,
}

impl CacheKind {
	fn as_str(self) -> &'static str {
		match self {
			Self::Result => "result",
			Self::Chunk => "chunk",
		}
	}
}

struct Entry<T> {
	data: T,
	created_at: OffsetDateTime,
	size_bytes: u64,
}

enum Lookup<T> {
	Fresh(T, u64),
	Stale,
	Absent,
}

#[derive(Default)]
struct Counters {
	hits: u64,
	misses: u64,
}

struct Inner {
	results: HashMap<String, Entry<SearchOutcome>>,
	chunks: HashMap<String, Entry<Vec<Chunk>>>,
	total_bytes: u64,
	result_counters: Counters,
	chunk_counters: Counters,
	evictions: u64,
}

/// Point-in-time counters, mostly for operators and tests.
#[derive(Clone, Copy, Debug)]
pub struct CacheStats {
	pub result_entries: usize,
	pub chunk_entries: usize,
	pub result_hits: u64,
	pub result_misses: u64,
	pub chunk_hits: u64,
	pub chunk_misses: u64,
	pub evictions: u64,
	pub total_bytes: u64,
}

pub struct RetrievalCache {
	inner: Mutex<Inner>,
	enabled: bool,
	max_bytes: u64,
	result_ttl: Duration,
	chunk_ttl: Duration,
}

impl RetrievalCache {
	pub fn new(cfg: &quarry_config::Cache) -> Self {
		Self {
			inner: Mutex::new(Inner {
				results: HashMap::new(),
				chunks: HashMap::new(),
				total_bytes: 0,
				result_counters: Counters::default(),
				chunk_counters: Counters::default(),
				evictions: 0,
			}),
			enabled: cfg.enabled,
			max_bytes: cfg.max_bytes,
			result_ttl: Duration::seconds(cfg.result_ttl_secs as i64),
			chunk_ttl: Duration::seconds(cfg.chunk_ttl_secs as i64),
		}
	}

	pub fn get_results(&self, key: &str, now: OffsetDateTime) -> Option<SearchOutcome> {
		if !self.enabled {
			return None;
		}

		let mut inner = self.lock();
		let lookup = lookup_entry(&inner.results, key, self.result_ttl, now);

		if matches!(lookup, Lookup::Stale) {
			// Stale entries are logically absent; drop on observation.
			if let Some(entry) = inner.results.remove(key) {
				inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
			}
		}

		finish_lookup(&mut inner.result_counters, CacheKind::Result, key, lookup)
	}

	pub fn put_results(&self, key: String, outcome: &SearchOutcome, now: OffsetDateTime) {
		if !self.enabled {
			return;
		}

		let Some(size_bytes) = estimate_size(outcome, CacheKind::Result) else {
			return;
		};

		let mut inner = self.lock();

		if !inner.make_room(size_bytes, self.max_bytes, CacheKind::Result) {
			return;
		}
		if let Some(old) = inner
			.results
			.insert(key, Entry { data: outcome.clone(), created_at: now, size_bytes })
		{
			inner.total_bytes = inner.total_bytes.saturating_sub(old.size_bytes);
		}

		inner.total_bytes += size_bytes;
	}

	pub fn get_chunks(&self, document_id: &str, now: OffsetDateTime) -> Option<Vec<Chunk>> {
		if !self.enabled {
			return None;
		}

		let mut inner = self.lock();
		let lookup = lookup_entry(&inner.chunks, document_id, self.chunk_ttl, now);

		if matches!(lookup, Lookup::Stale) {
			if let Some(entry) = inner.chunks.remove(document_id) {
				inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
			}
		}

		finish_lookup(&mut inner.chunk_counters, CacheKind::Chunk, document_id, lookup)
	}

	pub fn put_chunks(&self, document_id: String, chunks: &[Chunk], now: OffsetDateTime) {
		if !self.enabled {
			return;
		}

		let Some(size_bytes) = estimate_size(&chunks, CacheKind::Chunk) else {
			return;
		};

		let mut inner = self.lock();

		if !inner.make_room(size_bytes, self.max_bytes, CacheKind::Chunk) {
			return;
		}
		if let Some(old) = inner
			.chunks
			.insert(document_id, Entry { data: chunks.to_vec(), created_at: now, size_bytes })
		{
			inner.total_bytes = inner.total_bytes.saturating_sub(old.size_bytes);
		}

		inner.total_bytes += size_bytes;
	}

	/// Drops every expired entry in both stores, bounding worst-case
	/// staleness under low query volume. Returns the number removed.
	pub fn sweep(&self, now: OffsetDateTime) -> usize {
		let mut inner = self.lock();
		let mut removed = 0_usize;
		let mut freed = 0_u64;
		let result_ttl = self.result_ttl;
		let chunk_ttl = self.chunk_ttl;

		inner.results.retain(|_, entry| {
			if now - entry.created_at <= result_ttl {
				return true;
			}

			removed += 1;
			freed += entry.size_bytes;

			false
		});
		inner.chunks.retain(|_, entry| {
			if now - entry.created_at <= chunk_ttl {
				return true;
			}

			removed += 1;
			freed += entry.size_bytes;

			false
		});

		inner.total_bytes = inner.total_bytes.saturating_sub(freed);

		if removed > 0 {
			tracing::info!(removed, freed_bytes = freed, "Cache sweep removed expired entries.");
		}

		removed
	}

	pub fn stats(&self) -> CacheStats {
		let inner = self.lock();

		CacheStats {
			result_entries: inner.results.len(),
			chunk_entries: inner.chunks.len(),
			result_hits: inner.result_counters.hits,
			result_misses: inner.result_counters.misses,
			chunk_hits: inner.chunk_counters.hits,
			chunk_misses: inner.chunk_counters.misses,
			evictions: inner.evictions,
			total_bytes: inner.total_bytes,
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|err| err.into_inner())
	}
}

impl Inner {
	/// Evicts globally oldest entries, across both stores, until the new
	/// entry fits. An entry larger than the whole budget is refused.
	fn make_room(&mut self, size_bytes: u64, max_bytes: u64, kind: CacheKind) -> bool {
		if size_bytes > max_bytes {
			tracing::warn!(
				cache_kind = kind.as_str(),
				payload_size = size_bytes,
				budget = max_bytes,
				"Cache entry exceeds the whole budget; skipped."
			);

			return false;
		}

		while self.total_bytes + size_bytes > max_bytes {
			if !self.evict_oldest() {
				break;
			}
		}

		true
	}

	fn evict_oldest(&mut self) -> bool {
		let oldest_result = self
			.results
			.iter()
			.min_by_key(|(_, entry)| entry.created_at)
			.map(|(key, entry)| (key.clone(), entry.created_at));
		let oldest_chunk = self
			.chunks
			.iter()
			.min_by_key(|(_, entry)| entry.created_at)
			.map(|(key, entry)| (key.clone(), entry.created_at));
		let (from_results, key) = match (oldest_result, oldest_chunk) {
			(Some((result_key, result_at)), Some((chunk_key, chunk_at))) => {
				if result_at <= chunk_at {
					(true, result_key)
				} else {
					(false, chunk_key)
				}
			},
			(Some((result_key, _)), None) => (true, result_key),
			(None, Some((chunk_key, _))) => (false, chunk_key),
			(None, None) => return false,
		};
		let freed = if from_results {
			self.results.remove(&key).map(|entry| entry.size_bytes)
		} else {
			self.chunks.remove(&key).map(|entry| entry.size_bytes)
		};
		let Some(freed) = freed else {
			return false;
		};

		self.total_bytes = self.total_bytes.saturating_sub(freed);
		self.evictions += 1;

		tracing::debug!(freed_bytes = freed, "Cache evicted the oldest entry.");

		true
	}
}

fn lookup_entry<T: Clone>(
	entries: &HashMap<String, Entry<T>>,
	key: &str,
	ttl: Duration,
	now: OffsetDateTime,
) -> Lookup<T> {
	match entries.get(key) {
		Some(entry) if now - entry.created_at <= ttl => {
			Lookup::Fresh(entry.data.clone(), entry.size_bytes)
		},
		Some(_) => Lookup::Stale,
		None => Lookup::Absent,
	}
}

fn finish_lookup<T>(
	counters: &mut Counters,
	kind: CacheKind,
	key: &str,
	lookup: Lookup<T>,
) -> Option<T> {
	match lookup {
		Lookup::Fresh(data, payload_size) => {
			counters.hits += 1;

			tracing::info!(
				cache_kind = kind.as_str(),
				cache_key_prefix = key_prefix(key),
				hit = true,
				payload_size,
				"Cache hit."
			);

			Some(data)
		},
		Lookup::Stale | Lookup::Absent => {
			counters.misses += 1;

			tracing::info!(
				cache_kind = kind.as_str(),
				cache_key_prefix = key_prefix(key),
				hit = false,
				payload_size = 0_u64,
				"Cache miss."
			);

			None
		},
	}
}

/// Size estimation can fail; a cache write must never fail the request, so
/// the entry is simply not stored.
fn estimate_size<T: serde::Serialize>(value: &T, kind: CacheKind) -> Option<u64> {
	match serde_json::to_vec(value) {
		Ok(raw) => Some(raw.len() as u64),
		Err(err) => {
			tracing::warn!(
				error = %err,
				cache_kind = kind.as_str(),
				"Cache size estimation failed; entry skipped."
			);

			None
		},
	}
}

fn key_prefix(key: &str) -> &str {
	let len = key.len().min(12);

	&key[..len]
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use time::{Duration, OffsetDateTime};

	use quarry_domain::keyword::KeywordSource;
	use quarry_storage::models::Chunk;

	use super::RetrievalCache;
	use crate::search::{AggregatedResult, SearchOutcome};

	fn cache_config(max_bytes: u64) -> quarry_config::Cache {
		quarry_config::Cache {
			enabled: true,
			result_ttl_secs: 300,
			chunk_ttl_secs: 600,
			max_bytes,
			sweep_interval_secs: 60,
		}
	}

	fn now() -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("Valid timestamp.")
	}

	fn outcome(document_id: &str) -> SearchOutcome {
		SearchOutcome {
			results: vec![AggregatedResult {
				document_id: document_id.to_string(),
				title: "Title".to_string(),
				url: format!("https://wiki/{document_id}"),
				best_distance: 0.4,
				score_label: "80% match".to_string(),
				excerpt: "body".to_string(),
				chunk_count: 1,
				labels: BTreeSet::new(),
			}],
			keyword_source: KeywordSource::Primary,
		}
	}

	fn chunk(document_id: &str, body_len: usize) -> Chunk {
		Chunk {
			document_id: document_id.to_string(),
			chunk_index: 0,
			title: "Title".to_string(),
			body: "b".repeat(body_len),
			url: format!("https://wiki/{document_id}"),
			labels: BTreeSet::new(),
			last_updated: 0,
		}
	}

	#[test]
	fn hit_inside_ttl_miss_after() {
		let cache = RetrievalCache::new(&cache_config(1 << 20));
		let start = now();

		cache.put_results("key".to_string(), &outcome("DOC-1"), start);

		let just_before = start + Duration::seconds(300) - Duration::milliseconds(1);
		let just_after = start + Duration::seconds(300) + Duration::milliseconds(1);

		assert!(cache.get_results("key", just_before).is_some());
		assert!(cache.get_results("key", just_after).is_none());
		// The stale entry was dropped on observation.
		assert_eq!(cache.stats().result_entries, 0);
	}

	#[test]
	fn counters_track_hits_and_misses() {
		let cache = RetrievalCache::new(&cache_config(1 << 20));
		let start = now();

		cache.put_results("key".to_string(), &outcome("DOC-1"), start);
		cache.get_results("key", start);
		cache.get_results("absent", start);

		let stats = cache.stats();

		assert_eq!(stats.result_hits, 1);
		assert_eq!(stats.result_misses, 1);
	}

	#[test]
	fn budget_holds_across_both_stores() {
		let cache = RetrievalCache::new(&cache_config(2_000));
		let start = now();

		for ordinal in 0_i64..20 {
			let id = format!("DOC-{ordinal}");

			cache.put_results(id.clone(), &outcome(&id), start + Duration::seconds(ordinal));
			cache.put_chunks(id.clone(), &[chunk(&id, 64)], start + Duration::seconds(ordinal));

			assert!(cache.stats().total_bytes <= 2_000);
		}

		assert!(cache.stats().evictions > 0);
	}

	#[test]
	fn eviction_removes_the_globally_oldest_entry() {
		let cache = RetrievalCache::new(&cache_config(1_200));
		let start = now();

		cache.put_chunks("OLD".to_string(), &[chunk("OLD", 64)], start);
		cache.put_results("NEW".to_string(), &outcome("NEW"), start + Duration::seconds(5));

		// A large insert forces eviction; the chunk entry is older and goes
		// first even though the new entry lands in the result store.
		cache.put_chunks(
			"BIG".to_string(),
			&[chunk("BIG", 750)],
			start + Duration::seconds(10),
		);

		assert!(cache.get_chunks("OLD", start + Duration::seconds(11)).is_none());
		assert!(cache.get_results("NEW", start + Duration::seconds(11)).is_some());
		assert!(cache.get_chunks("BIG", start + Duration::seconds(11)).is_some());
	}

	#[test]
	fn oversized_entries_are_refused() {
		let cache = RetrievalCache::new(&cache_config(128));
		let start = now();

		cache.put_chunks("BIG".to_string(), &[chunk("BIG", 4_096)], start);

		assert_eq!(cache.stats().chunk_entries, 0);
		assert_eq!(cache.stats().total_bytes, 0);
	}

	#[test]
	fn sweep_clears_expired_entries_in_both_stores() {
		let cache = RetrievalCache::new(&cache_config(1 << 20));
		let start = now();

		cache.put_results("result".to_string(), &outcome("DOC-1"), start);
		cache.put_chunks("DOC-1".to_string(), &[chunk("DOC-1", 64)], start);

		// Results expire at 300s, chunks at 600s.
		let removed = cache.sweep(start + Duration::seconds(301));

		assert_eq!(removed, 1);
		assert_eq!(cache.stats().result_entries, 0);
		assert_eq!(cache.stats().chunk_entries, 1);

		let removed = cache.sweep(start + Duration::seconds(601));

		assert_eq!(removed, 1);
		assert_eq!(cache.stats().chunk_entries, 0);
		assert_eq!(cache.stats().total_bytes, 0);
	}

	#[test]
	fn disabled_cache_stores_nothing() {
		let mut cfg = cache_config(1 << 20);

		cfg.enabled = false;

		let cache = RetrievalCache::new(&cfg);
		let start = now();

		cache.put_results("key".to_string(), &outcome("DOC-1"), start);

		assert!(cache.get_results("key", start).is_none());
		assert_eq!(cache.stats().result_entries, 0);
	}

	#[test]
	fn replacing_a_key_releases_the_old_size() {
		let cache = RetrievalCache::new(&cache_config(1 << 20));
		let start = now();

		cache.put_chunks("DOC-1".to_string(), &[chunk("DOC-1", 512)], start);

		let first = cache.stats().total_bytes;

		cache.put_chunks("DOC-1".to_string(), &[chunk("DOC-1", 16)], start);

		assert!(cache.stats().total_bytes < first);
		assert_eq!(cache.stats().chunk_entries, 1);
	}
}
