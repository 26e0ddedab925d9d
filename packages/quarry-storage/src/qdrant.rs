use std::collections::{BTreeSet, HashMap};

use qdrant_client::qdrant::{
	Condition, Filter, Query, QueryPointsBuilder, Value, value::Kind,
};
use quarry_domain::labels::LabelFilterSet;

use crate::{
	Result,
	error::Error,
	models::{Chunk, SearchHit, normalize_label_text},
};

// A document that spans more chunks than this is pathological for a wiki
// corpus; the fetch stays bounded either way.
const MAX_DOCUMENT_CHUNKS: u64 = 512;

/// The only component that talks to the vector store. One query per call,
/// no retries; retry policy belongs to the caller.
pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}

impl QdrantStore {
	pub fn new(cfg: &quarry_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Nearest-neighbor rows for one query vector, payload included. Rows
	/// with a broken payload are logged and skipped, not surfaced.
	pub async fn query_chunks(
		&self,
		vector: &[f32],
		limit: u64,
		filter: Option<Filter>,
	) -> Result<Vec<SearchHit>> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Query vector has {} dimensions, expected {}.",
				vector.len(),
				self.vector_dim
			)));
		}

		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.limit(limit)
			.with_payload(true);

		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;
		let mut hits = Vec::with_capacity(response.result.len());

		for point in response.result {
			let Some(chunk) = chunk_from_payload(&point.payload) else {
				tracing::warn!("Store row is missing chunk payload fields.");

				continue;
			};

			// The store reports cosine similarity; distance keeps the
			// lower-is-better orientation callers rank by.
			hits.push(SearchHit { chunk, distance: 1.0 - point.score });
		}

		Ok(hits)
	}

	/// Every chunk of one document, ordered by chunk index.
	pub async fn fetch_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
		let filter = Filter::all([Condition::matches("document_id", document_id.to_string())]);
		let search = QueryPointsBuilder::new(self.collection.clone())
			.filter(filter)
			.limit(MAX_DOCUMENT_CHUNKS)
			.with_payload(true);
		let response = self.client.query(search).await?;
		let mut chunks = Vec::with_capacity(response.result.len());

		for point in response.result {
			let Some(chunk) = chunk_from_payload(&point.payload) else {
				tracing::warn!(document_id, "Store row is missing chunk payload fields.");

				continue;
			};

			chunks.push(chunk);
		}

		chunks.sort_by_key(|chunk| chunk.chunk_index);

		Ok(chunks)
	}
}

/// Pushed-down pre-filter for the store. The include override cannot be
/// expressed as a flat `must_not`, so the pushdown covers only the plain
/// exclusion case; the in-process filter stays authoritative either way.
pub fn label_filter(filters: &LabelFilterSet) -> Option<Filter> {
	if !filters.include_labels.is_empty() || filters.exclude_labels.is_empty() {
		return None;
	}

	let must_not = filters
		.exclude_labels
		.iter()
		.map(|label| Condition::matches("labels", label.clone()))
		.collect();

	Some(Filter { must: Vec::new(), should: Vec::new(), must_not, min_should: None })
}

fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<Chunk> {
	let document_id = payload_str(payload, "document_id")?;
	let chunk_index = payload_i64(payload, "chunk_index")?;
	let title = payload_str(payload, "title").unwrap_or_default();
	let body = payload_str(payload, "body").unwrap_or_default();
	let url = payload_str(payload, "url").unwrap_or_default();
	let labels = payload.get("labels").map(labels_from_value).unwrap_or_default();
	let last_updated = payload_i64(payload, "last_updated").unwrap_or(0);

	Some(Chunk { document_id, chunk_index, title, body, url, labels, last_updated })
}

fn labels_from_value(value: &Value) -> BTreeSet<String> {
	match &value.kind {
		Some(Kind::ListValue(list)) => {
			let mut labels = BTreeSet::new();

			for item in &list.values {
				if let Some(Kind::StringValue(text)) = &item.kind {
					labels.extend(normalize_label_text(text));
				}
			}

			labels
		},
		Some(Kind::StringValue(text)) => normalize_label_text(text),
		Some(Kind::StructValue(map)) => {
			map.fields.keys().flat_map(|key| normalize_label_text(key)).collect()
		},
		_ => BTreeSet::new(),
	}
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Some(text.clone()),
		_ => None,
	}
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::IntegerValue(value)) => Some(*value),
		Some(Kind::DoubleValue(value)) if value.fract() == 0.0 => Some(*value as i64),
		_ => None,
	}
}
