//! Deterministic fixtures for tests, plus the bits of environment plumbing
//! every suite needs.

use std::env;

use quarry_config::{
	Cache, Config, EmbeddingProviderConfig, Filters, Keywords, Providers, Qdrant, Search, Storage,
};
use quarry_storage::models::{Chunk, SearchHit};

/// Install a subscriber honoring `RUST_LOG`; repeated calls are fine.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Acceptance tests run only when a store is reachable.
pub fn env_qdrant_url() -> Option<String> {
	env::var("QUARRY_QDRANT_URL").ok()
}

pub fn chunk(document_id: &str, chunk_index: i64, body: &str) -> Chunk {
	labeled_chunk(document_id, chunk_index, body, &[])
}

pub fn labeled_chunk(document_id: &str, chunk_index: i64, body: &str, labels: &[&str]) -> Chunk {
	Chunk {
		document_id: document_id.to_string(),
		chunk_index,
		title: format!("Page {document_id}"),
		body: body.to_string(),
		url: format!("https://wiki.example.com/pages/{document_id}"),
		labels: labels.iter().map(|label| (*label).to_string()).collect(),
		last_updated: 1_700_000_000,
	}
}

pub fn hit(chunk: Chunk, distance: f32) -> SearchHit {
	SearchHit { chunk, distance }
}

/// A config that validates, pointed at the given store. Tests mutate the
/// parts they care about.
pub fn sample_config(qdrant_url: &str) -> Config {
	Config {
		storage: Storage {
			qdrant: Qdrant {
				url: qdrant_url.to_string(),
				collection: "corpus_chunks".to_string(),
				vector_dim: 4,
				timeout_ms: 2_000,
			},
		},
		providers: Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "test-embedding".to_string(),
				dimensions: 4,
				timeout_ms: 2_000,
				default_headers: serde_json::Map::new(),
			},
		},
		search: Search {
			top_k: 10,
			candidate_multiplier: 4,
			max_distance: 2.0,
			excerpt_max_chars: 200,
			min_body_chars: 1,
		},
		keywords: Keywords::default(),
		filters: Filters::default(),
		cache: Cache {
			enabled: true,
			result_ttl_secs: 300,
			chunk_ttl_secs: 600,
			max_bytes: 1 << 20,
			sweep_interval_secs: 60,
		},
	}
}
