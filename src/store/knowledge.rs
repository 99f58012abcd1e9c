//! Knowledge entry records and their store operations.
//!
//! One entry is a category-tagged fact or Q&A pair.  The store guarantees at
//! most one live entry per `(category, question)` via a UNIQUE constraint;
//! upserts are single-statement `ON CONFLICT` writes, so two concurrent
//! imports of the same key cannot duplicate it or lose each other's update
//! mid-read.  Entries are never deleted by normal flow.

use std::collections::HashMap;
use std::fmt;

use rusqlite::{Row, params};
use uuid::Uuid;

use super::{Db, now_iso8601};
use crate::error::AppError;

// ── Category ──────────────────────────────────────────────────────────────────

/// Enumerated knowledge category tag.
///
/// Row input is parsed case-insensitively; unknown or missing values
/// normalize to `General` (ingestion is operator-facing and forgiving).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    About,
    Services,
    Contact,
    Faq,
    Website,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::About => "About",
            Category::Services => "Services",
            Category::Contact => "Contact",
            Category::Faq => "FAQ",
            Category::Website => "Website",
            Category::General => "General",
        }
    }

    /// Case-insensitive parse; anything unrecognised maps to `General`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "about" => Category::About,
            "services" => Category::Services,
            "contact" => Category::Contact,
            "faq" => Category::Faq,
            "website" => Category::Website,
            _ => Category::General,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entry ─────────────────────────────────────────────────────────────────────

/// A knowledge entry as stored and retrieved.
///
/// `question` is `None` for pure statements; in SQL that is the empty
/// string so the UNIQUE key treats all no-question rows of a category as
/// one identity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeEntry {
    /// Unique entry identifier (UUID v4).
    pub id: String,
    pub category: String,
    pub question: Option<String>,
    pub answer: String,
    /// Provenance and other free-form annotations (e.g. `source = excel`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let question: String = row.get(2)?;
    let metadata_json: String = row.get(4)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        category: row.get(1)?,
        question: if question.is_empty() { None } else { Some(question) },
        answer: row.get(3)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const ENTRY_COLUMNS: &str = "id, category, question, answer, metadata, created_at, updated_at";

/// Normalize an optional question to its storage form.
fn question_key(question: Option<&str>) -> &str {
    question.map(str::trim).unwrap_or("")
}

impl Db {
    /// Insert or replace the answer for `(category, question)`.
    ///
    /// One atomic statement: on conflict only `answer` and `updated_at`
    /// change — `created_at` and the original provenance metadata survive
    /// re-imports. Idempotent for identical input.
    pub fn upsert_knowledge(
        &self,
        category: Category,
        question: Option<&str>,
        answer: &str,
        source: &str,
    ) -> Result<(), AppError> {
        let conn = self.conn()?;
        let now = now_iso8601();
        let metadata = serde_json::to_string(&HashMap::from([("source", source)]))
            .map_err(|e| AppError::Store(format!("serialise metadata: {e}")))?;
        conn.execute(
            "INSERT INTO knowledge (id, category, question, answer, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (category, question)
             DO UPDATE SET answer = excluded.answer, updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                category.as_str(),
                question_key(question),
                answer,
                metadata,
                now,
            ],
        )
        .map_err(|e| AppError::Store(format!("upsert knowledge: {e}")))?;
        Ok(())
    }

    /// Insert `(category, question)` only if absent; returns `true` when a
    /// row was created.  Existing answers are never overwritten — this is
    /// the default-seeding primitive, a no-op on every start after the
    /// first.
    pub fn insert_knowledge_if_absent(
        &self,
        category: Category,
        question: Option<&str>,
        answer: &str,
        source: &str,
    ) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let now = now_iso8601();
        let metadata = serde_json::to_string(&HashMap::from([("source", source)]))
            .map_err(|e| AppError::Store(format!("serialise metadata: {e}")))?;
        let changed = conn
            .execute(
                "INSERT INTO knowledge (id, category, question, answer, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (category, question) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    category.as_str(),
                    question_key(question),
                    answer,
                    metadata,
                    now,
                ],
            )
            .map_err(|e| AppError::Store(format!("seed knowledge: {e}")))?;
        Ok(changed > 0)
    }

    /// Look up a single entry by its dedup key.
    pub fn find_knowledge(
        &self,
        category: Category,
        question: Option<&str>,
    ) -> Result<Option<KnowledgeEntry>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM knowledge WHERE category = ?1 AND question = ?2"
            ))
            .map_err(|e| AppError::Store(format!("prepare find: {e}")))?;
        let mut rows = stmt
            .query_map(params![category.as_str(), question_key(question)], row_to_entry)
            .map_err(|e| AppError::Store(format!("find knowledge: {e}")))?;
        rows.next()
            .transpose()
            .map_err(|e| AppError::Store(format!("read knowledge row: {e}")))
    }

    /// Fetch up to `pool` candidate entries in deterministic oldest-first
    /// order (`created_at`, then rowid). This is the ranker's bounded
    /// oversample, not a full table scan.
    pub fn fetch_candidates(&self, pool: usize) -> Result<Vec<KnowledgeEntry>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM knowledge ORDER BY created_at, rowid LIMIT ?1"
            ))
            .map_err(|e| AppError::Store(format!("prepare candidates: {e}")))?;
        let rows = stmt
            .query_map(params![pool as i64], row_to_entry)
            .map_err(|e| AppError::Store(format!("fetch candidates: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Store(format!("read candidate row: {e}")))
    }

    /// Total number of live knowledge entries.
    pub fn knowledge_count(&self) -> Result<u64, AppError> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM knowledge", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| AppError::Store(format!("count knowledge: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db() -> (TempDir, Db) {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path()).unwrap();
        (tmp, db)
    }

    #[test]
    fn category_parse_known_and_unknown() {
        assert_eq!(Category::parse("services"), Category::Services);
        assert_eq!(Category::parse("FAQ"), Category::Faq);
        assert_eq!(Category::parse(" About "), Category::About);
        assert_eq!(Category::parse("banana"), Category::General);
        assert_eq!(Category::parse(""), Category::General);
    }

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let (_tmp, db) = db();
        db.upsert_knowledge(Category::Services, Some("Do you provide hosting?"), "Yes.", "excel")
            .unwrap();
        db.upsert_knowledge(
            Category::Services,
            Some("Do you provide hosting?"),
            "Yes, shared and VPS.",
            "excel",
        )
        .unwrap();

        assert_eq!(db.knowledge_count().unwrap(), 1);
        let e = db
            .find_knowledge(Category::Services, Some("Do you provide hosting?"))
            .unwrap()
            .unwrap();
        assert_eq!(e.answer, "Yes, shared and VPS.");
        assert_eq!(e.metadata.get("source").map(String::as_str), Some("excel"));
    }

    #[test]
    fn upsert_preserves_created_at_and_metadata() {
        let (_tmp, db) = db();
        db.insert_knowledge_if_absent(Category::About, Some("Who?"), "Us.", "default")
            .unwrap();
        let before = db.find_knowledge(Category::About, Some("Who?")).unwrap().unwrap();

        db.upsert_knowledge(Category::About, Some("Who?"), "Still us.", "excel")
            .unwrap();
        let after = db.find_knowledge(Category::About, Some("Who?")).unwrap().unwrap();

        assert_eq!(after.answer, "Still us.");
        assert_eq!(after.created_at, before.created_at);
        // Original seed provenance survives the re-import.
        assert_eq!(after.metadata.get("source").map(String::as_str), Some("default"));
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn absent_question_is_one_shared_identity() {
        let (_tmp, db) = db();
        db.upsert_knowledge(Category::General, None, "first statement", "excel").unwrap();
        db.upsert_knowledge(Category::General, None, "second statement", "excel").unwrap();

        assert_eq!(db.knowledge_count().unwrap(), 1);
        let e = db.find_knowledge(Category::General, None).unwrap().unwrap();
        assert_eq!(e.answer, "second statement");
        assert!(e.question.is_none());
    }

    #[test]
    fn absent_question_distinct_from_present() {
        let (_tmp, db) = db();
        db.upsert_knowledge(Category::General, None, "statement", "excel").unwrap();
        db.upsert_knowledge(Category::General, Some("Q?"), "answer", "excel").unwrap();
        assert_eq!(db.knowledge_count().unwrap(), 2);
    }

    #[test]
    fn insert_if_absent_never_overwrites() {
        let (_tmp, db) = db();
        assert!(db
            .insert_knowledge_if_absent(Category::Website, Some("URL?"), "example.com", "default")
            .unwrap());
        assert!(!db
            .insert_knowledge_if_absent(Category::Website, Some("URL?"), "other.com", "default")
            .unwrap());
        let e = db.find_knowledge(Category::Website, Some("URL?")).unwrap().unwrap();
        assert_eq!(e.answer, "example.com");
    }

    #[test]
    fn fetch_candidates_is_bounded_and_ordered() {
        let (_tmp, db) = db();
        for i in 0..6 {
            db.upsert_knowledge(Category::Faq, Some(&format!("q{i}")), &format!("a{i}"), "excel")
                .unwrap();
        }
        let got = db.fetch_candidates(4).unwrap();
        assert_eq!(got.len(), 4);
        // Oldest-first, rowid breaking any same-instant ties.
        assert_eq!(got[0].question.as_deref(), Some("q0"));
        assert_eq!(got[3].question.as_deref(), Some("q3"));
    }

    #[test]
    fn find_missing_returns_none() {
        let (_tmp, db) = db();
        assert!(db.find_knowledge(Category::Contact, Some("nope")).unwrap().is_none());
    }
}
