use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub storage: Storage,
	pub providers: Providers,
	pub search: Search,
	#[serde(default)]
	pub keywords: Keywords,
	#[serde(default)]
	pub filters: Filters,
	pub cache: Cache,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	/// Upper bound on one store query; the only unbounded-latency step in a
	/// search gets a deadline, nothing else does.
	#[serde(default = "default_store_timeout_ms")]
	pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Search {
	#[serde(default = "default_top_k")]
	pub top_k: u32,
	/// Rows requested from the store per returned result; multi-chunk
	/// documents collapse during merge, so the store is over-fetched.
	#[serde(default = "default_candidate_multiplier")]
	pub candidate_multiplier: u32,
	#[serde(default = "default_max_distance")]
	pub max_distance: f32,
	#[serde(default = "default_excerpt_max_chars")]
	pub excerpt_max_chars: u32,
	/// Documents whose trimmed body is shorter than this are dropped from
	/// results. Zero disables the policy.
	#[serde(default = "default_min_body_chars")]
	pub min_body_chars: u32,
}

#[derive(Debug, Deserialize)]
pub struct Keywords {
	#[serde(default = "default_max_keywords")]
	pub max_keywords: u32,
	#[serde(default)]
	pub extra_stop_words: Vec<String>,
	#[serde(default)]
	pub phrases: Vec<String>,
}

impl Default for Keywords {
	fn default() -> Self {
		Self {
			max_keywords: default_max_keywords(),
			extra_stop_words: Vec::new(),
			phrases: Vec::new(),
		}
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct Filters {
	#[serde(default)]
	pub title_exclude_patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Cache {
	#[serde(default = "default_cache_enabled")]
	pub enabled: bool,
	pub result_ttl_secs: u64,
	pub chunk_ttl_secs: u64,
	pub max_bytes: u64,
	#[serde(default = "default_sweep_interval_secs")]
	pub sweep_interval_secs: u64,
}

fn default_store_timeout_ms() -> u64 {
	5_000
}

fn default_top_k() -> u32 {
	10
}

fn default_candidate_multiplier() -> u32 {
	4
}

fn default_max_distance() -> f32 {
	2.0
}

fn default_excerpt_max_chars() -> u32 {
	500
}

fn default_min_body_chars() -> u32 {
	1
}

fn default_max_keywords() -> u32 {
	8
}

fn default_cache_enabled() -> bool {
	true
}

fn default_sweep_interval_secs() -> u64 {
	60
}
