//! Scripted completion provider

use async_trait::async_trait;
use gauntlet_core::{CompletionProvider, ModelConfig, ProviderError};
use gauntlet_schema::Schema;
use parking_lot::Mutex;

/// Provider that replays a queue of canned outcomes.
///
/// Each `complete` call pops the next scripted entry; an exhausted script
/// answers with `ProviderError::Malformed` so runaway loops fail loudly.
/// Prompts are captured for assertion.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.script.lock().insert(0, Ok(text.into()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn fail(self, error: ProviderError) -> Self {
        self.script.lock().insert(0, Err(error));
        self
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of scripted entries not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        prompt: &str,
        _model: &ModelConfig,
        _schema: Option<&Schema>,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        self.script
            .lock()
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Malformed("script exhausted".to_string())))
    }
}
