//! Knowledge ingestion — bulk upsert of externally parsed rows, plus the
//! fixed default seeding that bootstraps an empty store.
//!
//! The spreadsheet container itself is the uploader's problem; this module
//! starts from row records.  [`rows_from_json`] is the seam for callers that
//! hold raw bytes: a JSON array of `{category?, question?, answer}` objects
//! (spreadsheet header spellings `Category`/`Question`/`Answer` accepted).
//! Malformed input fails the whole call with a parse error; valid rows are
//! committed one by one, so a mid-batch fault keeps the rows already
//! written.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::store::Db;
use crate::store::knowledge::Category;

/// One ingestion row, as produced by the tabular parser upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeRow {
    #[serde(default, alias = "Category")]
    pub category: Option<String>,
    #[serde(default, alias = "Question")]
    pub question: Option<String>,
    #[serde(default, alias = "Answer")]
    pub answer: Option<String>,
}

/// Outcome of one ingestion call, for operator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows written (created or answer-replaced).
    pub upserted: usize,
    /// Rows dropped for having no answer.
    pub skipped: usize,
}

/// Parse a JSON byte blob into ingestion rows.
/// Anything that is not an array of row objects is a [`AppError::Parse`].
pub fn rows_from_json(bytes: &[u8]) -> Result<Vec<KnowledgeRow>, AppError> {
    serde_json::from_slice(bytes).map_err(|e| AppError::Parse(format!("ingestion rows: {e}")))
}

/// Bulk-upsert rows into the knowledge store.
///
/// Per row: empty/missing answer → silently skipped; otherwise an atomic
/// upsert keyed on `(category, question)` — re-importing the same file is
/// idempotent.  Row-by-row commits, not one transaction.
pub fn ingest(db: &Db, rows: &[KnowledgeRow]) -> Result<IngestReport, AppError> {
    let mut report = IngestReport { upserted: 0, skipped: 0 };

    for row in rows {
        let answer = row.answer.as_deref().map(str::trim).unwrap_or("");
        if answer.is_empty() {
            report.skipped += 1;
            continue;
        }

        let category = row
            .category
            .as_deref()
            .map(Category::parse)
            .unwrap_or(Category::General);
        let question = row
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        db.upsert_knowledge(category, question, answer, "excel")?;
        report.upserted += 1;
    }

    debug!(upserted = report.upserted, skipped = report.skipped, "ingest complete");
    Ok(report)
}

/// The bootstrap knowledge set: `(category, question, answer)`.
const DEFAULT_KNOWLEDGE: &[(Category, &str, &str)] = &[
    (
        Category::About,
        "What is Kenmark ITan Solutions?",
        "Kenmark ITan Solutions is a technology company focused on delivering innovative solutions in AI, consulting, training, and digital transformation. We help businesses leverage cutting-edge technology to achieve their goals.",
    ),
    (
        Category::About,
        "What is Kenmark ITan Solutions tagline?",
        "Learn. Create. Impress. Kenmark ITan Solutions is a one-stop shop for IT solutions including hosting, development, design, branding, marketing, and consultancy.",
    ),
    (
        Category::Services,
        "What services are offered?",
        "We offer AI Solutions & Consulting, Technology Training & Workshops, Digital Transformation Services, Custom Software Development, and Cloud Solutions & Migration.",
    ),
    (
        Category::Services,
        "Do you provide hosting?",
        "Yes. We provide shared hosting, VPS, and dedicated servers with 24x7 support and reliable uptime.",
    ),
    (
        Category::Services,
        "Do you offer design and branding?",
        "Yes. We provide UI/UX design, graphics, landing pages, brand identity, and integrated marketing support.",
    ),
    (
        Category::Services,
        "Do you offer consultancy and marketing?",
        "Yes. We provide consultancy for technical strategy, SEO, SMM, integrated campaigns, and technical advisory.",
    ),
    (
        Category::Services,
        "What toolkits do you use?",
        "We work with Node.js, Express, Bootstrap, MySQL, Flutter, Angular, Next.js, React.js, Tailwind CSS, MongoDB, WordPress, and Figma.",
    ),
    (
        Category::Contact,
        "How can I contact the company?",
        "You can visit our website at kenmarkitan.com or use the contact page for more information.",
    ),
    (
        Category::Website,
        "What is the company website?",
        "The official website is https://kenmarkitan.com where you can find more information about our services and contact details.",
    ),
];

/// Seed the fixed bootstrap entries, find-or-create only.
///
/// Runs at every process start; existing entries (seeded or since
/// re-imported) are left untouched, so this is a no-op after the first run.
/// Returns how many entries were actually created.
pub fn seed_defaults(db: &Db) -> Result<usize, AppError> {
    let mut created = 0;
    for (category, question, answer) in DEFAULT_KNOWLEDGE {
        if db.insert_knowledge_if_absent(*category, Some(question), answer, "default")? {
            created += 1;
        }
    }
    if created > 0 {
        info!(created, "default knowledge seeded");
    }
    Ok(created)
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

    fn row(category: Option<&str>, question: Option<&str>, answer: Option<&str>) -> KnowledgeRow {
        KnowledgeRow {
            category: category.map(String::from),
            question: question.map(String::from),
            answer: answer.map(String::from),
        }
    }

    #[test]
    fn rows_parse_from_json_with_spreadsheet_headers() {
        let bytes = br#"[
            {"Category": "Services", "Question": "Hosting?", "Answer": "Yes."},
            {"answer": "A bare statement."}
        ]"#;
        let rows = rows_from_json(bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category.as_deref(), Some("Services"));
        assert_eq!(rows[1].answer.as_deref(), Some("A bare statement."));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = rows_from_json(b"{not rows}").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn ingest_skips_rows_without_answer() {
        let (_tmp, db) = db();
        let rows = vec![
            row(Some("FAQ"), Some("Q1?"), Some("A1")),
            row(Some("FAQ"), Some("Q2?"), None),
            row(Some("FAQ"), Some("Q3?"), Some("   ")),
        ];
        let report = ingest(&db, &rows).unwrap();
        assert_eq!(report, IngestReport { upserted: 1, skipped: 2 });
        assert_eq!(db.knowledge_count().unwrap(), 1);
    }

    #[test]
    fn ingest_defaults_missing_category_to_general() {
        let (_tmp, db) = db();
        ingest(&db, &[row(None, Some("Q?"), Some("A"))]).unwrap();
        let e = db.find_knowledge(Category::General, Some("Q?")).unwrap().unwrap();
        assert_eq!(e.category, "General");
        assert_eq!(e.metadata.get("source").map(String::as_str), Some("excel"));
    }

    #[test]
    fn ingest_twice_is_idempotent() {
        let (_tmp, db) = db();
        let rows = vec![
            row(Some("Services"), Some("Hosting?"), Some("Yes.")),
            row(Some("About"), None, Some("We exist.")),
        ];
        ingest(&db, &rows).unwrap();
        let first = db.find_knowledge(Category::Services, Some("Hosting?")).unwrap().unwrap();

        ingest(&db, &rows).unwrap();
        assert_eq!(db.knowledge_count().unwrap(), 2);
        let second = db.find_knowledge(Category::Services, Some("Hosting?")).unwrap().unwrap();
        assert_eq!(second.answer, "Yes.");
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn ingest_replaces_answer_for_existing_key() {
        let (_tmp, db) = db();
        ingest(&db, &[row(Some("FAQ"), Some("Hours?"), Some("9-5"))]).unwrap();
        ingest(&db, &[row(Some("FAQ"), Some("Hours?"), Some("24x7"))]).unwrap();
        let e = db.find_knowledge(Category::Faq, Some("Hours?")).unwrap().unwrap();
        assert_eq!(e.answer, "24x7");
        assert_eq!(db.knowledge_count().unwrap(), 1);
    }

    #[test]
    fn seed_defaults_once_then_noop() {
        let (_tmp, db) = db();
        let created = seed_defaults(&db).unwrap();
        assert_eq!(created, DEFAULT_KNOWLEDGE.len());
        assert_eq!(db.knowledge_count().unwrap(), DEFAULT_KNOWLEDGE.len() as u64);

        assert_eq!(seed_defaults(&db).unwrap(), 0);
        assert_eq!(db.knowledge_count().unwrap(), DEFAULT_KNOWLEDGE.len() as u64);
    }

    #[test]
    fn seed_does_not_clobber_imported_answer() {
        let (_tmp, db) = db();
        ingest(
            &db,
            &[row(Some("Services"), Some("Do you provide hosting?"), Some("Imported answer."))],
        )
        .unwrap();
        seed_defaults(&db).unwrap();
        let e = db
            .find_knowledge(Category::Services, Some("Do you provide hosting?"))
            .unwrap()
            .unwrap();
        assert_eq!(e.answer, "Imported answer.");
    }
}
