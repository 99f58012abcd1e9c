//! Dummy LLM provider — echoes the last user turn prefixed with `[echo]`.
//! Used for testing the full engine round-trip without a real API key.
//! The shared call counter and recorded system prompt let tests assert
//! exactly when the model was invoked and with what instructions.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::llm::{ChatTurn, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    calls: Arc<AtomicUsize>,
    last_system: Arc<Mutex<Option<String>>>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the call counter — shared across clones.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// System prompt from the most recent `complete` call, if any.
    /// Shared across clones, like the counter.
    pub fn last_system(&self) -> Option<String> {
        self.last_system.lock().ok().and_then(|g| g.clone())
    }

    pub async fn complete(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_system.lock() {
            *guard = Some(system.to_string());
        }
        let last = turns.last().map(|t| t.content.as_str()).unwrap_or("");
        Ok(format!("[echo] {last}"))
    }
}
