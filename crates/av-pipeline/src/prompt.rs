use async_trait::async_trait;

/// Abstracts the operator-interaction surface the parameter handler uses in manual mode
/// (§4.2), so pipeline logic stays testable independent of a real terminal.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Prompts with `message`; `?` should be handled by the caller before invoking this
    /// (see `prompt_with_description`), this just returns one line of raw input.
    async fn prompt(&self, message: &str) -> String;
}

/// A prompter that never offers manual overrides — used in automatic mode and in tests.
pub struct NoPrompt;

#[async_trait]
impl Prompter for NoPrompt {
    async fn prompt(&self, _message: &str) -> String {
        String::new()
    }
}

/// A scripted prompter for deterministic tests: returns queued answers in order.
#[cfg(any(test, feature = "test-util"))]
pub struct ScriptedPrompter {
    answers: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedPrompter {
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            answers: parking_lot::Mutex::new(answers),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn prompt(&self, _message: &str) -> String {
        let mut guard = self.answers.lock();
        if guard.is_empty() {
            String::new()
        } else {
            guard.remove(0)
        }
    }
}
