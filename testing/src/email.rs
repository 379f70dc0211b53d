//! Mock email provider for testing.

use async_trait::async_trait;
use simbay_core::email::{EmailError, EmailMessage, EmailProvider};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Outbox {
    sent: Vec<EmailMessage>,
    reject: HashSet<String>,
}

/// Mock email provider.
///
/// Records messages instead of sending them. Recipients added with
/// [`MockEmailProvider::reject`] fail with [`EmailError::Rejected`].
#[derive(Default)]
pub struct MockEmailProvider {
    outbox: Mutex<Outbox>,
}

impl std::fmt::Debug for MockEmailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEmailProvider").finish_non_exhaustive()
    }
}

impl MockEmailProvider {
    /// Create a new mock email provider that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends to `recipient` will be rejected
    pub fn reject(&self, recipient: &str) {
        self.outbox().reject.insert(recipient.to_string());
    }

    /// Messages accepted so far
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox().sent.clone()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
        let mut outbox = self.outbox();
        if outbox.reject.contains(&message.to) {
            return Err(EmailError::Rejected(format!(
                "mailbox unavailable: {}",
                message.to
            )));
        }
        outbox.sent.push(message.clone());
        Ok(format!("msg_mock_{}", outbox.sent.len()))
    }
}
