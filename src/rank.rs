//! Keyword relevance ranker — selects the knowledge entries worth handing to
//! the model for a given query.
//!
//! Deliberately approximate and non-semantic: whitespace tokens, substring
//! matching, score = number of matching tokens.  The candidate pool is a
//! bounded oversample of `2 × limit` entries fetched in deterministic
//! oldest-first order, so repeated calls over an unchanged store return
//! identical rankings (ties keep fetch order; Rust's sort is stable).

use tracing::debug;

use crate::error::AppError;
use crate::store::Db;
use crate::store::knowledge::KnowledgeEntry;

/// Minimum token length kept by the stopword-lite filter.
const MIN_TOKEN_CHARS: usize = 3;

/// Oversample factor applied to `limit` when fetching candidates.
const POOL_FACTOR: usize = 2;

/// Result of one ranking pass.  `matched == false` iff `entries` is empty —
/// the caller must treat that as "no relevant knowledge".
#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub entries: Vec<KnowledgeEntry>,
    pub matched: bool,
}

/// Lowercase whitespace tokens of more than two characters.
/// Duplicate tokens are kept and each counts toward the score.
fn tokenize(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}

/// Number of query tokens occurring as substrings of the entry's combined
/// question + answer + category text.  A token counts once no matter how
/// often it repeats inside the haystack.
fn score(entry: &KnowledgeEntry, tokens: &[String]) -> usize {
    let haystack = format!(
        "{} {} {}",
        entry.question.as_deref().unwrap_or(""),
        entry.answer,
        entry.category
    )
    .to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}

/// Rank knowledge entries against `query`, returning at most `limit`
/// survivors in descending score order.
///
/// Never fails on an empty store or an empty query — both simply yield
/// `matched = false`. A store fault is surfaced as an error for the engine
/// to degrade on.
pub fn rank(db: &Db, query: &str, limit: usize) -> Result<RankOutcome, AppError> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Ok(RankOutcome { entries: Vec::new(), matched: false });
    }

    let candidates = db.fetch_candidates(limit * POOL_FACTOR)?;

    let mut scored: Vec<(usize, KnowledgeEntry)> = candidates
        .into_iter()
        .map(|e| (score(&e, &tokens), e))
        .collect();
    // Stable: equal scores keep candidate fetch order.
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let entries: Vec<KnowledgeEntry> = scored
        .into_iter()
        .filter(|(s, _)| *s > 0)
        .take(limit)
        .map(|(_, e)| e)
        .collect();

    debug!(query_tokens = tokens.len(), survivors = entries.len(), "rank complete");

    let matched = !entries.is_empty();
    Ok(RankOutcome { entries, matched })
}
