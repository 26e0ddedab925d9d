use std::collections::BTreeSet;

pub const LABEL_ARCHIVED: &str = "archived";
pub const LABEL_MEETING_NOTES: &str = "meeting-notes";
pub const LABEL_FOLDER: &str = "folder";

// Title conventions that mark a page as not citable, independent of labels.
const TITLE_EXCLUDE_PATTERNS: &[&str] = &["[noindex]", "do not index"];

/// Per-request opt-in flags. Unknown keys deserialize to nothing so callers
/// can send newer flags without breaking older builds.
#[derive(Clone, Copy, Debug, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct FilterOptions {
	pub include_meeting_notes: bool,
	pub include_archived: bool,
}

/// Concrete include/exclude sets for one request. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LabelFilterSet {
	pub include_labels: BTreeSet<String>,
	pub exclude_labels: BTreeSet<String>,
	pub exclude_title_patterns: Vec<String>,
}

impl LabelFilterSet {
	/// A chunk survives unless an excluded label sticks (no include-set
	/// override) or its title matches an exclusion pattern.
	pub fn allows(&self, labels: &BTreeSet<String>, title: &str) -> bool {
		let excluded = labels.iter().any(|label| self.exclude_labels.contains(label));
		let rescued = !self.include_labels.is_empty()
			&& labels.iter().any(|label| self.include_labels.contains(label));

		if excluded && !rescued {
			return false;
		}

		let title = title.to_lowercase();

		!self.exclude_title_patterns.iter().any(|pattern| title.contains(pattern.as_str()))
	}
}

#[derive(Clone, Debug, Default)]
pub struct LabelFilterBuilder {
	extra_title_patterns: Vec<String>,
}

impl LabelFilterBuilder {
	pub fn new(extra_title_patterns: &[String]) -> Self {
		let extra_title_patterns = extra_title_patterns
			.iter()
			.map(|pattern| pattern.to_lowercase())
			.filter(|pattern| !pattern.trim().is_empty())
			.collect();

		Self { extra_title_patterns }
	}

	/// Everything starts excluded; each flag moves its label over to the
	/// include set. Pure and cheap, safe to call per request.
	pub fn build(&self, options: &FilterOptions) -> LabelFilterSet {
		let mut include_labels = BTreeSet::new();
		let mut exclude_labels: BTreeSet<String> =
			[LABEL_ARCHIVED, LABEL_MEETING_NOTES, LABEL_FOLDER]
				.into_iter()
				.map(str::to_string)
				.collect();

		if options.include_meeting_notes {
			exclude_labels.remove(LABEL_MEETING_NOTES);
			include_labels.insert(LABEL_MEETING_NOTES.to_string());
		}
		if options.include_archived {
			exclude_labels.remove(LABEL_ARCHIVED);
			include_labels.insert(LABEL_ARCHIVED.to_string());
		}

		let mut exclude_title_patterns: Vec<String> =
			TITLE_EXCLUDE_PATTERNS.iter().map(|pattern| (*pattern).to_string()).collect();

		exclude_title_patterns.extend(self.extra_title_patterns.iter().cloned());

		LabelFilterSet { include_labels, exclude_labels, exclude_title_patterns }
	}
}
