//! Shutdown confirmation.

use async_trait::async_trait;

/// Asks whoever is in charge whether the host may quit while prints are
/// still running.
#[async_trait]
pub trait ShutdownPrompt: Send + Sync {
    /// `active` lists the addresses with a print in progress. Return `true`
    /// to go ahead and abandon them.
    async fn confirm_shutdown(&self, active: &[String]) -> bool;
}

/// Prompt with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl ShutdownPrompt for FixedAnswer {
    async fn confirm_shutdown(&self, _active: &[String]) -> bool {
        self.0
    }
}
