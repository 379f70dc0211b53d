//! Email provider trait.

use crate::error::BookingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rendered email ready to hand to a provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub text_body: String,
    /// Optional HTML body
    pub html_body: Option<String>,
}

/// Email delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    /// Provider rejected the message (bad address, policy)
    #[error("email rejected: {0}")]
    Rejected(String),

    /// Provider could not be reached
    #[error("email transport error: {0}")]
    Transport(String),
}

impl From<EmailError> for BookingError {
    fn from(err: EmailError) -> Self {
        Self::Email(err.to_string())
    }
}

/// Email provider.
///
/// This trait abstracts over email delivery services (SMTP relays, transactional APIs).
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Sends one message, returning the provider's message id.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network request fails
    /// - Email provider rejects the request
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError>;
}
