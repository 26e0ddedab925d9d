mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, EmbeddingProviderConfig, Filters, Keywords, Providers, Qdrant, Search, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.qdrant.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.url must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.qdrant.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "storage.qdrant.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.embedding.api_key must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search.top_k == 0 {
		return Err(Error::Validation {
			message: "search.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.search.candidate_multiplier == 0 {
		return Err(Error::Validation {
			message: "search.candidate_multiplier must be greater than zero.".to_string(),
		});
	}
	if !cfg.search.max_distance.is_finite() {
		return Err(Error::Validation {
			message: "search.max_distance must be a finite number.".to_string(),
		});
	}
	if cfg.search.max_distance <= 0.0 {
		return Err(Error::Validation {
			message: "search.max_distance must be greater than zero.".to_string(),
		});
	}
	if cfg.search.excerpt_max_chars < 8 {
		return Err(Error::Validation {
			message: "search.excerpt_max_chars must be at least 8.".to_string(),
		});
	}
	if cfg.keywords.max_keywords == 0 {
		return Err(Error::Validation {
			message: "keywords.max_keywords must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.result_ttl_secs == 0 {
		return Err(Error::Validation {
			message: "cache.result_ttl_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.chunk_ttl_secs == 0 {
		return Err(Error::Validation {
			message: "cache.chunk_ttl_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.max_bytes == 0 {
		return Err(Error::Validation {
			message: "cache.max_bytes must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.sweep_interval_secs == 0 {
		return Err(Error::Validation {
			message: "cache.sweep_interval_secs must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.keywords.extra_stop_words.retain(|word| !word.trim().is_empty());
	cfg.keywords.phrases.retain(|phrase| !phrase.trim().is_empty());
	cfg.filters.title_exclude_patterns.retain(|pattern| !pattern.trim().is_empty());
}
