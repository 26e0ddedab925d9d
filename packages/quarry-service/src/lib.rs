pub mod cache;
pub mod search;

mod error;

pub use error::{Error, Result as ServiceResult};

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use quarry_config::{Config, EmbeddingProviderConfig};
use quarry_domain::{keyword::KeywordExtractor, labels::LabelFilterBuilder};
use quarry_providers::embedding;
use quarry_storage::{models::Chunk, qdrant::QdrantStore};

pub use cache::{CacheStats, RetrievalCache};
pub use search::{
	AggregatedResult, MergePolicy, SearchOutcome, SearchRequest, SearchResponse, merge,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Embedding is the one remote call upstream of retrieval; the seam exists
/// so tests can stub it.
pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed_query<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		query: &'a str,
	) -> BoxFuture<'a, quarry_providers::Result<Vec<f32>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed_query<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		query: &'a str,
	) -> BoxFuture<'a, quarry_providers::Result<Vec<f32>>> {
		Box::pin(embedding::embed_query(cfg, query))
	}
}

impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { embedding }
	}
}

impl Default for Providers {
	fn default() -> Self {
		Self { embedding: Arc::new(DefaultProviders) }
	}
}

/// The single entry point callers wire up: one instance per process,
/// constructed once and passed by reference. No module-level state.
pub struct QuarryService {
	pub cfg: Config,
	pub store: QdrantStore,
	pub cache: Arc<RetrievalCache>,
	pub providers: Providers,
	pub(crate) keywords: KeywordExtractor,
	pub(crate) filter_builder: LabelFilterBuilder,
}

impl QuarryService {
	pub fn new(cfg: Config, store: QdrantStore) -> Self {
		Self::with_providers(cfg, store, Providers::default())
	}

	pub fn with_providers(cfg: Config, store: QdrantStore, providers: Providers) -> Self {
		let keywords = KeywordExtractor::new(
			&cfg.keywords.extra_stop_words,
			&cfg.keywords.phrases,
			cfg.keywords.max_keywords as usize,
		);
		let filter_builder = LabelFilterBuilder::new(&cfg.filters.title_exclude_patterns);
		let cache = Arc::new(RetrievalCache::new(&cfg.cache));

		Self { cfg, store, cache, providers, keywords, filter_builder }
	}

	/// Every chunk of one document, read through the chunk cache.
	pub async fn document_chunks(&self, document_id: &str) -> ServiceResult<Vec<Chunk>> {
		let document_id = document_id.trim();

		if document_id.is_empty() {
			return Err(Error::InvalidRequest {
				message: "document_id must be non-empty.".to_string(),
			});
		}

		let now = time::OffsetDateTime::now_utc();

		if let Some(chunks) = self.cache.get_chunks(document_id, now) {
			return Ok(chunks);
		}

		let timeout_ms = self.cfg.storage.qdrant.timeout_ms;
		let fetch = self.store.fetch_document(document_id);
		let chunks = match tokio::time::timeout(Duration::from_millis(timeout_ms), fetch).await {
			Ok(result) => result?,
			Err(_) => return Err(Error::StoreTimeout { elapsed_ms: timeout_ms }),
		};

		self.cache.put_chunks(document_id.to_string(), &chunks, now);

		Ok(chunks)
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Periodic expiry pass; without it a quiet process would hold stale
	/// entries until the next lookup touches them.
	pub fn spawn_cache_sweeper(&self) -> tokio::task::JoinHandle<()> {
		let cache = Arc::clone(&self.cache);
		let period = Duration::from_secs(self.cfg.cache.sweep_interval_secs);

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);

			// The first tick fires immediately and would sweep an empty cache.
			ticker.tick().await;

			loop {
				ticker.tick().await;
				cache.sweep(time::OffsetDateTime::now_utc());
			}
		})
	}
}
