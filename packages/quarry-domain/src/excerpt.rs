//! Bounded excerpts centered on keyword occurrences.
//!
//! Centering alone drops one anchor when matched terms are far apart, and a
//! fixed margin alone wastes budget when they are close together, so the
//! window policy switches on the size of the matched span.

use crate::keyword::KeywordSet;

/// Glued onto any edge that does not touch a document boundary. Counts
/// against the caller's budget.
pub const TRUNCATION_MARKER: &str = "…";

pub fn extract(body: &str, keywords: &KeywordSet, max_chars: usize) -> String {
	if max_chars == 0 {
		return String::new();
	}

	let total_chars = body.chars().count();

	if total_chars <= max_chars {
		return body.to_string();
	}

	let Some((first_start, last_end)) = occurrence_span(body, keywords) else {
		// No anchors: the document lead is the least surprising excerpt.
		let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
		let head: String = body.chars().take(keep).collect();

		return format!("{head}{TRUNCATION_MARKER}");
	};

	let span = last_end - first_start;
	let (start, end) = if span < max_chars / 2 {
		// Narrow span: center the full window on its midpoint.
		let mid = first_start + span / 2;
		let start = mid.saturating_sub(max_chars / 2);
		let end = (start + max_chars).min(total_chars);
		let start = end.saturating_sub(max_chars);

		(start, end)
	} else {
		// Wide span: spend ~30% of the budget on each flank and clip the
		// tail if the anchors are farther apart than the budget allows.
		let margin = max_chars * 3 / 10;
		let start = first_start.saturating_sub(margin);
		let end = (last_end + margin).min(total_chars).min(start + max_chars);

		(start, end)
	};

	render_window(body, start, end, total_chars, max_chars)
}

/// Char span `(first_start, last_end)` over every occurrence of every
/// keyword, or `None` when nothing matches.
fn occurrence_span(body: &str, keywords: &KeywordSet) -> Option<(usize, usize)> {
	// ASCII-only lowering keeps byte offsets aligned with the original text.
	let search: String = body.chars().map(|ch| ch.to_ascii_lowercase()).collect();
	let mut first: Option<usize> = None;
	let mut last: Option<usize> = None;

	for keyword in &keywords.keywords {
		let needle = keyword.to_ascii_lowercase();

		for (offset, matched) in search.match_indices(needle.as_str()) {
			let end = offset + matched.len();

			if first.map(|value| offset < value).unwrap_or(true) {
				first = Some(offset);
			}
			if last.map(|value| end > value).unwrap_or(true) {
				last = Some(end);
			}
		}
	}

	Some((byte_to_char(body, first?), byte_to_char(body, last?)))
}

fn byte_to_char(body: &str, byte_offset: usize) -> usize {
	body.char_indices().take_while(|(offset, _)| *offset < byte_offset).count()
}

fn render_window(
	body: &str,
	start: usize,
	end: usize,
	total_chars: usize,
	max_chars: usize,
) -> String {
	let marker_chars = TRUNCATION_MARKER.chars().count();
	let lead = start > 0;
	let mut end = end;
	let mut trail = end < total_chars;

	// Shrinking the window can introduce a trailing marker, which in turn
	// shrinks the content budget; this settles within two passes.
	loop {
		let mut budget = max_chars;

		if lead {
			budget = budget.saturating_sub(marker_chars);
		}
		if trail {
			budget = budget.saturating_sub(marker_chars);
		}
		if end - start <= budget {
			break;
		}

		end = start + budget;
		trail = true;
	}

	let slice = char_slice(body, start, end);
	let mut out = String::with_capacity(slice.len() + 2 * TRUNCATION_MARKER.len());

	if lead {
		out.push_str(TRUNCATION_MARKER);
	}

	out.push_str(slice);

	if trail {
		out.push_str(TRUNCATION_MARKER);
	}

	// Budgets too small to hold both markers degenerate to marker-only
	// output above; the hard cap still holds.
	if out.chars().count() > max_chars {
		out = out.chars().take(max_chars).collect();
	}

	out
}

fn char_slice(body: &str, start: usize, end: usize) -> &str {
	let mut byte_start = body.len();
	let mut byte_end = body.len();

	for (count, (offset, _)) in body.char_indices().enumerate() {
		if count == start {
			byte_start = offset;
		}
		if count == end {
			byte_end = offset;

			break;
		}
	}

	&body[byte_start..byte_end]
}
