use std::{
	cmp::Ordering,
	collections::{BTreeSet, HashMap},
	time::Duration,
};

use time::OffsetDateTime;

use quarry_domain::{
	excerpt,
	keyword::{KeywordSet, KeywordSource},
	labels::{FilterOptions, LabelFilterSet},
};
use quarry_storage::{models::SearchHit, qdrant::label_filter};

use crate::{Error, QuarryService, ServiceResult};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct SearchRequest {
	pub query: String,
	pub top_k: Option<u32>,
	pub max_distance: Option<f32>,
	#[serde(default)]
	pub include_meeting_notes: bool,
	#[serde(default)]
	pub include_archived: bool,
}

/// One result per distinct document surviving filtering.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AggregatedResult {
	pub document_id: String,
	pub title: String,
	pub url: String,
	pub best_distance: f32,
	/// Human-readable rendering of `best_distance`.
	pub score_label: String,
	pub excerpt: String,
	pub chunk_count: u32,
	pub labels: BTreeSet<String>,
}

/// What the result cache stores for one request hash.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SearchOutcome {
	pub results: Vec<AggregatedResult>,
	pub keyword_source: KeywordSource,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct SearchResponse {
	pub results: Vec<AggregatedResult>,
	pub keyword_source: KeywordSource,
	pub cache_hit: bool,
}

/// Ranking knobs for one merge pass. Folded into the result cache key so
/// differently-shaped requests never alias.
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct MergePolicy {
	pub top_k: usize,
	pub max_distance: f32,
	pub excerpt_max_chars: usize,
	/// Documents with a shorter trimmed body are dropped; an empty page is
	/// not a useful citation. Zero disables the policy.
	pub min_body_chars: usize,
}

impl QuarryService {
	pub async fn search(&self, req: SearchRequest) -> ServiceResult<SearchResponse> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}

		let max_distance = req.max_distance.unwrap_or(self.cfg.search.max_distance);

		if !max_distance.is_finite() || max_distance <= 0.0 {
			return Err(Error::InvalidRequest {
				message: "max_distance must be a finite positive number.".to_string(),
			});
		}

		let top_k = req.top_k.unwrap_or(self.cfg.search.top_k).max(1);
		let options = FilterOptions {
			include_meeting_notes: req.include_meeting_notes,
			include_archived: req.include_archived,
		};
		let filters = self.filter_builder.build(&options);
		let policy = MergePolicy {
			top_k: top_k as usize,
			max_distance,
			excerpt_max_chars: self.cfg.search.excerpt_max_chars as usize,
			min_body_chars: self.cfg.search.min_body_chars as usize,
		};
		let now = OffsetDateTime::now_utc();
		let cache_key = match result_cache_key(query, &filters, &policy) {
			Ok(key) => Some(key),
			Err(err) => {
				// The cache is an optimization; a broken key never fails the
				// request.
				tracing::warn!(error = %err, "Cache key build failed.");

				None
			},
		};

		if let Some(key) = cache_key.as_ref()
			&& let Some(outcome) = self.cache.get_results(key, now)
		{
			return Ok(SearchResponse {
				results: outcome.results,
				keyword_source: outcome.keyword_source,
				cache_hit: true,
			});
		}

		let keywords = self.keywords.extract(query);
		let vector = self
			.providers
			.embedding
			.embed_query(&self.cfg.providers.embedding, query)
			.await?;

		if vector.len() != self.cfg.storage.qdrant.vector_dim as usize {
			return Err(Error::Provider {
				message: "Embedding vector dimension mismatch.".to_string(),
			});
		}

		let limit = u64::from(top_k) * u64::from(self.cfg.search.candidate_multiplier);
		let timeout_ms = self.cfg.storage.qdrant.timeout_ms;
		let store_query = self.store.query_chunks(&vector, limit, label_filter(&filters));
		let hits = match tokio::time::timeout(Duration::from_millis(timeout_ms), store_query).await
		{
			Ok(result) => result?,
			Err(_) => return Err(Error::StoreTimeout { elapsed_ms: timeout_ms }),
		};

		tracing::debug!(
			hits = hits.len(),
			keyword_source = ?keywords.source,
			"Store query completed."
		);

		let groups = group_hits(hits, &filters, max_distance);

		// Write-through: surviving chunk sets are reusable per document.
		for (document_id, group) in &groups {
			let chunks: Vec<_> = group.iter().map(|hit| hit.chunk.clone()).collect();

			self.cache.put_chunks(document_id.clone(), &chunks, now);
		}

		let results = aggregate_groups(groups, &keywords, &policy);
		let outcome = SearchOutcome { results, keyword_source: keywords.source };

		if let Some(key) = cache_key {
			self.cache.put_results(key, &outcome, now);
		}

		Ok(SearchResponse {
			results: outcome.results,
			keyword_source: outcome.keyword_source,
			cache_hit: false,
		})
	}
}

/// Turns raw per-chunk hits into a deduplicated, ordered per-document list.
/// Idempotent: same hits and filters, same output.
pub fn merge(
	hits: Vec<SearchHit>,
	filters: &LabelFilterSet,
	keywords: &KeywordSet,
	policy: &MergePolicy,
) -> Vec<AggregatedResult> {
	aggregate_groups(group_hits(hits, filters, policy.max_distance), keywords, policy)
}

fn group_hits(
	hits: Vec<SearchHit>,
	filters: &LabelFilterSet,
	max_distance: f32,
) -> HashMap<String, Vec<SearchHit>> {
	let mut groups: HashMap<String, Vec<SearchHit>> = HashMap::new();

	for hit in hits {
		if !hit.distance.is_finite() || hit.distance > max_distance {
			continue;
		}
		if !filters.allows(&hit.chunk.labels, &hit.chunk.title) {
			continue;
		}

		groups.entry(hit.chunk.document_id.clone()).or_default().push(hit);
	}

	groups
}

fn aggregate_groups(
	groups: HashMap<String, Vec<SearchHit>>,
	keywords: &KeywordSet,
	policy: &MergePolicy,
) -> Vec<AggregatedResult> {
	let mut results = Vec::with_capacity(groups.len());

	for (document_id, mut group) in groups {
		group.sort_by_key(|hit| hit.chunk.chunk_index);

		let best_distance =
			group.iter().map(|hit| hit.distance).fold(f32::INFINITY, f32::min);
		let mut body = String::new();

		for hit in &group {
			if !body.is_empty() {
				body.push('\n');
			}

			body.push_str(hit.chunk.body.as_str());
		}

		if policy.min_body_chars > 0
			&& body.trim().chars().count() < policy.min_body_chars
		{
			continue;
		}

		let mut labels = BTreeSet::new();

		for hit in &group {
			labels.extend(hit.chunk.labels.iter().cloned());
		}

		let first = &group[0].chunk;

		results.push(AggregatedResult {
			title: first.title.clone(),
			url: first.url.clone(),
			best_distance,
			score_label: score_label(best_distance),
			excerpt: excerpt::extract(&body, keywords, policy.excerpt_max_chars),
			chunk_count: group.len() as u32,
			labels,
			document_id,
		});
	}

	// Total order: distance, then corroboration, then id, so equal inputs
	// produce byte-equal output.
	results.sort_by(|a, b| {
		a.best_distance
			.partial_cmp(&b.best_distance)
			.unwrap_or(Ordering::Equal)
			.then_with(|| b.chunk_count.cmp(&a.chunk_count))
			.then_with(|| a.document_id.cmp(&b.document_id))
	});
	results.truncate(policy.top_k);

	results
}

/// Cosine distance runs 0..=2; render it as a match percentage.
pub fn score_label(distance: f32) -> String {
	let percent = ((1.0 - distance / 2.0) * 100.0).clamp(0.0, 100.0).round();

	format!("{percent:.0}% match")
}

/// Stable key over everything that shapes a response. Queries differing only
/// in case or surrounding whitespace share an entry.
pub fn result_cache_key(
	query: &str,
	filters: &LabelFilterSet,
	policy: &MergePolicy,
) -> Result<String, serde_json::Error> {
	let payload = serde_json::json!({
		"kind": "search",
		"query": normalize_query(query),
		"filters": filters,
		"policy": policy,
	});
	let raw = serde_json::to_vec(&payload)?;

	Ok(blake3::hash(&raw).to_hex().to_string())
}

fn normalize_query(query: &str) -> String {
	query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use quarry_domain::{
		keyword::KeywordExtractor,
		labels::{FilterOptions, LabelFilterBuilder},
	};
	use quarry_storage::models::{Chunk, SearchHit};

	use super::{MergePolicy, merge, normalize_query, result_cache_key, score_label};

	fn policy() -> MergePolicy {
		MergePolicy { top_k: 10, max_distance: 2.0, excerpt_max_chars: 200, min_body_chars: 1 }
	}

	fn hit(document_id: &str, chunk_index: i64, distance: f32, body: &str) -> SearchHit {
		labeled_hit(document_id, chunk_index, distance, body, &[])
	}

	fn labeled_hit(
		document_id: &str,
		chunk_index: i64,
		distance: f32,
		body: &str,
		labels: &[&str],
	) -> SearchHit {
		SearchHit {
			chunk: Chunk {
				document_id: document_id.to_string(),
				chunk_index,
				title: format!("Page {document_id}"),
				body: body.to_string(),
				url: format!("https://wiki/{document_id}"),
				labels: labels.iter().map(|label| (*label).to_string()).collect(),
				last_updated: 0,
			},
			distance,
		}
	}

	fn keywords(query: &str) -> quarry_domain::keyword::KeywordSet {
		KeywordExtractor::default().extract(query)
	}

	fn default_filters() -> quarry_domain::labels::LabelFilterSet {
		LabelFilterBuilder::default().build(&FilterOptions::default())
	}

	#[test]
	fn merge_is_idempotent_and_deduplicates() {
		let hits = vec![
			hit("DOC-1", 0, 0.5, "alpha body"),
			hit("DOC-1", 1, 0.3, "beta body"),
			hit("DOC-2", 0, 0.4, "gamma body"),
		];
		let filters = default_filters();
		let keywords = keywords("alpha");
		let first = merge(hits.clone(), &filters, &keywords, &policy());
		let second = merge(hits, &filters, &keywords, &policy());

		assert_eq!(first.len(), 2);

		let mut ids: Vec<_> = first.iter().map(|result| result.document_id.clone()).collect();

		ids.dedup();

		assert_eq!(ids.len(), 2);
		assert_eq!(
			first.iter().map(|result| &result.document_id).collect::<Vec<_>>(),
			second.iter().map(|result| &result.document_id).collect::<Vec<_>>()
		);
		assert_eq!(
			first.iter().map(|result| &result.excerpt).collect::<Vec<_>>(),
			second.iter().map(|result| &result.excerpt).collect::<Vec<_>>()
		);
	}

	#[test]
	fn ranking_is_monotonic_in_best_distance() {
		let hits = vec![
			hit("FAR", 0, 0.9, "far body"),
			hit("NEAR", 0, 0.2, "near body"),
			hit("MID", 0, 0.5, "mid body"),
		];
		let results = merge(hits, &default_filters(), &keywords("body"), &policy());
		let ids: Vec<_> = results.iter().map(|result| result.document_id.as_str()).collect();

		assert_eq!(ids, vec!["NEAR", "MID", "FAR"]);

		for pair in results.windows(2) {
			assert!(pair[0].best_distance <= pair[1].best_distance);
		}
	}

	#[test]
	fn ties_break_on_chunk_count() {
		let hits = vec![
			hit("SINGLE", 0, 0.4, "one chunk"),
			hit("MULTI", 0, 0.4, "first chunk"),
			hit("MULTI", 1, 0.6, "second chunk"),
		];
		let results = merge(hits, &default_filters(), &keywords("chunk"), &policy());

		assert_eq!(results[0].document_id, "MULTI");
		assert_eq!(results[0].chunk_count, 2);
		assert_eq!(results[1].document_id, "SINGLE");
	}

	#[test]
	fn best_distance_is_the_group_minimum() {
		let hits = vec![
			hit("DOC-1", 0, 0.8, "first"),
			hit("DOC-1", 1, 0.3, "second"),
			hit("DOC-1", 2, 0.6, "third"),
		];
		let results = merge(hits, &default_filters(), &keywords("second"), &policy());

		assert_eq!(results.len(), 1);
		assert!((results[0].best_distance - 0.3).abs() < f32::EPSILON);
	}

	#[test]
	fn distance_cutoff_drops_hits() {
		let hits = vec![hit("DOC-1", 0, 1.9, "far away")];
		let tight =
			MergePolicy { max_distance: 1.0, ..policy() };
		let results = merge(hits, &default_filters(), &keywords("far"), &tight);

		assert!(results.is_empty());
	}

	#[test]
	fn excluded_labels_drop_the_document() {
		let hits = vec![
			labeled_hit("ARCH", 0, 0.1, "archived body", &["archived"]),
			labeled_hit("ARCH", 1, 0.2, "archived body two", &["archived"]),
			hit("LIVE", 0, 0.5, "live body"),
		];
		let results = merge(hits, &default_filters(), &keywords("body"), &policy());
		let ids: Vec<_> = results.iter().map(|result| result.document_id.as_str()).collect();

		// The archived document would rank first; with no opt-in it must not
		// appear at all.
		assert_eq!(ids, vec!["LIVE"]);
	}

	#[test]
	fn opted_in_labels_survive_filtering() {
		let options = FilterOptions { include_archived: true, ..FilterOptions::default() };
		let filters = LabelFilterBuilder::default().build(&options);
		let hits = vec![labeled_hit("ARCH", 0, 0.1, "archived body", &["archived"])];
		let results = merge(hits, &filters, &keywords("body"), &policy());

		assert_eq!(results.len(), 1);
		assert!(results[0].labels.contains("archived"));
	}

	#[test]
	fn empty_body_documents_are_dropped() {
		let hits = vec![
			hit("EMPTY", 0, 0.3, "   "),
			hit("FULL", 0, 0.4, "a real body with content"),
		];
		let results = merge(hits, &default_filters(), &keywords("content"), &policy());
		let ids: Vec<_> = results.iter().map(|result| result.document_id.as_str()).collect();

		assert_eq!(ids, vec!["FULL"]);
	}

	#[test]
	fn empty_body_policy_can_be_disabled() {
		let hits = vec![hit("EMPTY", 0, 0.3, "   ")];
		let relaxed = MergePolicy { min_body_chars: 0, ..policy() };
		let results = merge(hits, &default_filters(), &keywords("anything"), &relaxed);

		assert_eq!(results.len(), 1);
	}

	#[test]
	fn multi_chunk_document_aggregates() {
		// Spec scenario: an empty page at distance 0.3 and an 8-chunk page
		// whose chunks run 0.4..=0.9 with a long concatenated body.
		let mut hits = vec![hit("P1", 0, 0.3, "")];

		for index in 0..8_i64 {
			let body = format!(
				"Chunk {index} talks about the classroom copy function. {}",
				"filler text ".repeat(120)
			);

			hits.push(hit("P2", index, 0.4 + index as f32 * 0.071, &body));
		}

		let tight = MergePolicy { top_k: 3, ..policy() };
		let results =
			merge(hits, &default_filters(), &keywords("classroom copy function"), &tight);

		assert_eq!(results.len(), 1);
		assert_eq!(results[0].document_id, "P2");
		assert_eq!(results[0].chunk_count, 8);
		assert!((results[0].best_distance - 0.4).abs() < 1e-6);
		assert!(results[0].excerpt.chars().count() <= 200);
		assert!(results[0].excerpt.contains("copy"));
	}

	#[test]
	fn top_k_truncates() {
		let hits: Vec<_> = (0..10)
			.map(|ordinal| {
				hit(
					&format!("DOC-{ordinal}"),
					0,
					0.1 + ordinal as f32 * 0.05,
					"body text here",
				)
			})
			.collect();
		let small = MergePolicy { top_k: 3, ..policy() };
		let results = merge(hits, &default_filters(), &keywords("body"), &small);

		assert_eq!(results.len(), 3);
		assert_eq!(results[0].document_id, "DOC-0");
	}

	#[test]
	fn filter_soundness_holds_for_outputs() {
		let filters = default_filters();
		let hits = vec![
			labeled_hit("A", 0, 0.2, "body", &["howto"]),
			labeled_hit("B", 0, 0.3, "body", &["meeting-notes", "howto"]),
		];
		let results = merge(hits, &filters, &keywords("body"), &policy());

		for result in &results {
			let excluded_hit = result
				.labels
				.iter()
				.any(|label| filters.exclude_labels.contains(label));

			assert!(!excluded_hit);
		}
	}

	#[test]
	fn score_label_renders_percentages() {
		assert_eq!(score_label(0.0), "100% match");
		assert_eq!(score_label(0.4), "80% match");
		assert_eq!(score_label(2.0), "0% match");
		assert_eq!(score_label(5.0), "0% match");
	}

	#[test]
	fn cache_key_normalizes_query_shape() {
		let filters = default_filters();
		let policy = policy();
		let a = result_cache_key("Classroom  Copy", &filters, &policy).expect("key");
		let b = result_cache_key("classroom copy", &filters, &policy).expect("key");
		let c = result_cache_key("classroom paste", &filters, &policy).expect("key");

		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn cache_key_depends_on_filters_and_policy() {
		let policy = policy();
		let defaults = default_filters();
		let opted = LabelFilterBuilder::default().build(&FilterOptions {
			include_archived: true,
			..FilterOptions::default()
		});
		let base = result_cache_key("classroom", &defaults, &policy).expect("key");
		let with_filters = result_cache_key("classroom", &opted, &policy).expect("key");
		let with_policy = result_cache_key(
			"classroom",
			&defaults,
			&MergePolicy { top_k: 3, ..policy },
		)
		.expect("key");

		assert_ne!(base, with_filters);
		assert_ne!(base, with_policy);
	}

	#[test]
	fn normalized_queries_collapse_whitespace() {
		assert_eq!(normalize_query("  A   b\tC "), "a b c");
	}

	#[test]
	fn labels_union_over_surviving_chunks() {
		let hits = vec![
			labeled_hit("DOC-1", 0, 0.2, "body one", &["howto"]),
			labeled_hit("DOC-1", 1, 0.4, "body two", &["guide"]),
		];
		let results = merge(hits, &default_filters(), &keywords("body"), &policy());
		let labels: Vec<_> = results[0].labels.iter().cloned().collect();

		assert_eq!(labels, vec!["guide".to_string(), "howto".to_string()]);
	}
}
