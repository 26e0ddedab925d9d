use std::{
	collections::{BTreeSet, HashSet},
	sync::LazyLock,
};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_script::{Script, UnicodeScript};

/// Default cap on the number of keywords kept for one query.
pub const DEFAULT_MAX_KEYWORDS: usize = 8;

const MIN_TOKEN_CHARS: usize = 2;
const MAX_TOKEN_CHARS: usize = 8;
const HIGH_PRIORITY_MIN_CHARS: usize = 3;
const FALLBACK_MAX_TOKEN_CHARS: usize = 4;

// Word-forming runs: alphanumerics plus the scripts the corpus mixes into
// queries. The prolonged sound mark is Script=Common and needs listing by
// hand or katakana loanwords get split. Runs outside 2..=8 chars are ids,
// URLs, or single-char noise.
const TOKEN_PATTERN: &str = r"[\p{Latin}\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}0-9ー]+";

static TOKEN_RE: LazyLock<Result<Regex, regex::Error>> =
	LazyLock::new(|| Regex::new(TOKEN_PATTERN));

// Hiragana particles glue compounds together in queries. Splitting on them
// shreds some legitimate terms; the phrase table recovers those.
const PARTICLE_CHARS: &[char] =
	&['の', 'に', 'は', 'を', 'が', 'と', 'で', 'へ', 'も', 'や', 'か'];

const STOP_WORDS: &[&str] = &[
	"and", "are", "but", "can", "did", "does", "for", "from", "has", "have", "how", "its", "not",
	"our", "that", "the", "their", "them", "they", "this", "was", "what", "when", "where",
	"which", "who", "why", "will", "with", "you", "your", "ください", "したい", "して", "する",
	"です", "ます", "教えて", "方法",
];

// Multi-token terms that naive segmentation would shred or split apart.
const DOMAIN_PHRASES: &[&str] =
	&["access control", "meeting notes", "release notes", "single sign-on"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordSource {
	Primary,
	Fallback,
}

/// Keywords extracted from one query, ordered by first appearance.
///
/// `keywords` is the capped, deduplicated working set; the priority sets
/// partition it. `source` records which segmentation strategy produced it.
#[derive(Clone, Debug)]
pub struct KeywordSet {
	pub keywords: Vec<String>,
	pub high_priority: BTreeSet<String>,
	pub low_priority: BTreeSet<String>,
	pub source: KeywordSource,
}

impl KeywordSet {
	pub fn is_empty(&self) -> bool {
		self.keywords.is_empty()
	}
}

#[derive(Debug, thiserror::Error)]
enum SegmentError {
	#[error("Failed to build the word-run pattern: {0}")]
	Pattern(regex::Error),
	#[error("Primary segmentation produced no tokens for a non-blank query.")]
	NoTokens,
}

#[derive(Clone, Debug)]
pub struct KeywordExtractor {
	stop_words: BTreeSet<String>,
	phrases: Vec<String>,
	max_keywords: usize,
}

impl Default for KeywordExtractor {
	fn default() -> Self {
		Self::new(&[], &[], DEFAULT_MAX_KEYWORDS)
	}
}

impl KeywordExtractor {
	pub fn new(
		extra_stop_words: &[String],
		extra_phrases: &[String],
		max_keywords: usize,
	) -> Self {
		let mut stop_words: BTreeSet<String> =
			STOP_WORDS.iter().map(|word| (*word).to_string()).collect();

		for word in extra_stop_words {
			stop_words.insert(word.to_lowercase());
		}

		let mut phrases: Vec<String> =
			DOMAIN_PHRASES.iter().map(|phrase| (*phrase).to_lowercase()).collect();

		for phrase in extra_phrases {
			let phrase = phrase.to_lowercase();

			if !phrase.trim().is_empty() && !phrases.contains(&phrase) {
				phrases.push(phrase);
			}
		}

		Self { stop_words, phrases, max_keywords: max_keywords.max(1) }
	}

	/// Extraction never fails: a broken primary strategy downgrades to the
	/// minimal extractor and the result records which one ran.
	pub fn extract(&self, query: &str) -> KeywordSet {
		let normalized: String = query.nfkc().collect();

		match self.primary_tokens(&normalized) {
			Ok(tokens) => assemble(&normalized, tokens, self.max_keywords, KeywordSource::Primary),
			Err(err) => {
				tracing::warn!(
					error = %err,
					"Primary keyword segmentation failed; using the minimal extractor."
				);

				let tokens = fallback_tokens(&normalized);

				assemble(&normalized, tokens, self.max_keywords, KeywordSource::Fallback)
			},
		}
	}

	fn primary_tokens(&self, query: &str) -> Result<Vec<String>, SegmentError> {
		let pattern = TOKEN_RE.as_ref().map_err(|err| SegmentError::Pattern(err.clone()))?;
		let mut tokens = Vec::new();

		for segment in query.split(is_segment_break) {
			if segment.is_empty() {
				continue;
			}

			for run in pattern.find_iter(segment) {
				let chars = run.as_str().chars().count();

				if !(MIN_TOKEN_CHARS..=MAX_TOKEN_CHARS).contains(&chars) {
					continue;
				}

				let token = run.as_str().to_lowercase();

				if self.stop_words.contains(&token) {
					continue;
				}

				tokens.push(token);
			}
		}

		let query_lower = query.to_lowercase();

		for phrase in &self.phrases {
			if query_lower.contains(phrase.as_str()) {
				tokens.push(phrase.clone());
			}
		}

		if tokens.is_empty() && !query.trim().is_empty() {
			return Err(SegmentError::NoTokens);
		}

		Ok(tokens)
	}
}

fn is_segment_break(ch: char) -> bool {
	if ch.is_whitespace() || ch.is_ascii_punctuation() {
		return true;
	}
	if PARTICLE_CHARS.contains(&ch) {
		return true;
	}

	matches!(ch, '、' | '。' | '・' | '「' | '」' | '（' | '）' | '！' | '？' | '：' | '；' | '～')
}

fn is_word_char(ch: char) -> bool {
	if ch.is_ascii_alphanumeric() || ch == 'ー' {
		return true;
	}

	matches!(
		ch.script(),
		Script::Latin | Script::Han | Script::Hiragana | Script::Katakana | Script::Hangul
	)
}

// Minimal strategy: word-script runs of 2..=4 chars, nothing else.
fn fallback_tokens(query: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut current = String::new();
	let mut chars = 0_usize;

	for ch in query.chars() {
		if is_word_char(ch) {
			current.extend(ch.to_lowercase());
			chars += 1;

			continue;
		}
		if (MIN_TOKEN_CHARS..=FALLBACK_MAX_TOKEN_CHARS).contains(&chars) {
			tokens.push(current.clone());
		}

		current.clear();
		chars = 0;
	}

	if (MIN_TOKEN_CHARS..=FALLBACK_MAX_TOKEN_CHARS).contains(&chars) {
		tokens.push(current);
	}

	tokens
}

fn assemble(
	query: &str,
	tokens: Vec<String>,
	max_keywords: usize,
	source: KeywordSource,
) -> KeywordSet {
	let mut ordered = Vec::new();
	let mut seen = HashSet::new();

	for token in tokens {
		if seen.insert(token.clone()) {
			ordered.push(token);
		}
	}

	let mut high = Vec::new();
	let mut low = Vec::new();

	for token in ordered {
		if token.chars().count() >= HIGH_PRIORITY_MIN_CHARS && query.contains(token.as_str()) {
			high.push(token);
		} else {
			low.push(token);
		}
	}

	let mut keywords = Vec::new();
	let mut high_priority = BTreeSet::new();
	let mut low_priority = BTreeSet::new();

	for token in high {
		if keywords.len() >= max_keywords {
			break;
		}

		high_priority.insert(token.clone());
		keywords.push(token);
	}
	for token in low {
		if keywords.len() >= max_keywords {
			break;
		}

		low_priority.insert(token.clone());
		keywords.push(token);
	}

	KeywordSet { keywords, high_priority, low_priority, source }
}
