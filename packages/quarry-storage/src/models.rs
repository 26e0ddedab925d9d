use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One indexed segment of a source document, as stored in the vector store.
///
/// `(document_id, chunk_index)` is unique within a corpus snapshot. Rows are
/// written by the ingestion pipeline and read-only here; re-indexing replaces
/// them wholesale.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Chunk {
	pub document_id: String,
	pub chunk_index: i64,
	pub title: String,
	pub body: String,
	pub url: String,
	pub labels: BTreeSet<String>,
	/// Unix seconds, as carried in the store payload.
	pub last_updated: i64,
}

/// A chunk with the similarity distance from one store query. Lower is more
/// similar. Never persisted.
#[derive(Clone, Debug)]
pub struct SearchHit {
	pub chunk: Chunk,
	pub distance: f32,
}

/// Flattens the label shapes observed in the corpus into one set: a JSON
/// array of strings, a JSON object (keys are the labels), or a comma-joined
/// plain string. Everything above this boundary sees `BTreeSet<String>`.
pub fn normalize_label_text(raw: &str) -> BTreeSet<String> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return BTreeSet::new();
	}

	if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
		match value {
			serde_json::Value::Array(items) => {
				return items
					.into_iter()
					.filter_map(|item| match item {
						serde_json::Value::String(label) => clean_label(&label),
						_ => None,
					})
					.collect();
			},
			serde_json::Value::Object(map) => {
				return map.keys().filter_map(|key| clean_label(key)).collect();
			},
			_ => {},
		}
	}

	trimmed.split(',').filter_map(clean_label).collect()
}

fn clean_label(raw: &str) -> Option<String> {
	let label = raw.trim().to_lowercase();

	if label.is_empty() { None } else { Some(label) }
}
