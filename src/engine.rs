//! Response orchestrator — ties ranker, session history, and the LLM
//! provider into one user-facing turn.
//!
//! The contract callers rely on: a turn never hard-fails on retrieval or
//! generation.  Every internal fault degrades to one of two fixed strings —
//! the no-knowledge fallback or the apology-retry — while persistence faults
//! on the session edges (an operator-visible boundary) still surface as
//! errors.

use tracing::{debug, warn};

use crate::error::AppError;
use crate::llm::{ChatTurn, LlmProvider};
use crate::rank::rank;
use crate::store::Db;
use crate::store::knowledge::KnowledgeEntry;
use crate::store::sessions::{ChatMessage, Role};

/// System instruction embedding the fixed behavioral rules.
/// The retrieved context is appended below it each turn.
pub const SYSTEM_PROMPT: &str = "You are an AI assistant for Kenmark ITan Solutions. Your role is to help users with information about the company, services, and FAQs.

IMPORTANT RULES:
1. Only answer questions using the provided context from the knowledge base
2. If the information is not available in the context, politely say: \"I don't have that information yet. Please contact us at kenmarkitan.com for more details.\"
3. Be polite, concise, and professional
4. Do not make up information or hallucinate
5. If asked about something outside your knowledge base, redirect to the website

Use the following context to answer the user's question:";

/// Returned verbatim when no knowledge entry is relevant.
pub const NO_INFO: &str =
    "I don't have that information yet. Please contact us at kenmarkitan.com for more details.";

/// Returned verbatim when retrieval context was found but generation failed.
pub const APOLOGY: &str = "I apologize, but I'm having trouble processing your request right now. Please try again later or contact us at kenmarkitan.com.";

/// Engine knobs, injected at construction (see `[chat]` in the config).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub rank_limit: usize,
    pub history_window: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { rank_limit: 5, history_window: 20 }
    }
}

/// One completed turn.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
}

/// The retrieval-and-generation core.
///
/// Holds the store handle and the provider capability; both are injected so
/// tests can substitute a dummy provider and a temp-dir store.
#[derive(Debug, Clone)]
pub struct ChatEngine {
    db: Db,
    provider: LlmProvider,
    opts: EngineOptions,
}

impl ChatEngine {
    pub fn new(db: Db, provider: LlmProvider, opts: EngineOptions) -> Self {
        Self { db, provider, opts }
    }

    /// Store handle, for callers that also manage sessions or ingestion.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Run one full conversational turn: resolve the session, persist the
    /// user message, generate against prior history, persist the reply.
    ///
    /// History is read before the user message is written, so the model sees
    /// the new query exactly once (as the final turn). Nothing is held
    /// across the model call — retrieval and the user-message write complete
    /// first.
    pub async fn respond(
        &self,
        session_id: Option<&str>,
        query: &str,
    ) -> Result<ChatReply, AppError> {
        let session = self.db.resolve_session(session_id, self.opts.history_window)?;
        let history = session.messages;

        self.db.append_message(&session.session_id, Role::User, query)?;

        let response = self.generate(&history, query).await;

        self.db.append_message(&session.session_id, Role::Assistant, &response)?;

        Ok(ChatReply { session_id: session.session_id, response })
    }

    /// Produce the answer text for `query` given prior `history`.
    ///
    /// Infallible by design: a retrieval fault degrades to the no-knowledge
    /// fallback, a generation fault to the apology string.
    pub async fn generate(&self, history: &[ChatMessage], query: &str) -> String {
        let outcome = match rank(&self.db, query, self.opts.rank_limit) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "retrieval failed — answering with fallback");
                return NO_INFO.to_string();
            }
        };

        if !outcome.matched {
            debug!("no relevant knowledge — fallback without model call");
            return NO_INFO.to_string();
        }

        let context = format_context(&outcome.entries);
        let system = format!("{SYSTEM_PROMPT}\n\nContext:\n{context}");

        let mut turns: Vec<ChatTurn> = history
            .iter()
            .map(|m| ChatTurn { role: m.role.as_str().to_string(), content: m.content.clone() })
            .collect();
        turns.push(ChatTurn::user(query));

        match self.provider.complete(&system, &turns).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "generation failed — answering with apology");
                APOLOGY.to_string()
            }
        }
    }
}

/// Format ranked entries as labeled context blocks:
/// `[category] Q: <question>\nA: <answer>`, question line omitted for pure
/// statements, blocks joined by a blank line.
pub fn format_context(entries: &[KnowledgeEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let question = e
                .question
                .as_deref()
                .map(|q| format!("Q: {q}\n"))
                .unwrap_or_default();
            format!("[{}] {}A: {}", e.category, question, e.answer)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
