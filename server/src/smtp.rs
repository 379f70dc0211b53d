//! SMTP email provider using Lettre.
//!
//! Each message gets a generated `Message-ID`; that id is returned to the dispatcher
//! and is what delivery webhooks refer back to.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use simbay_core::email::{EmailError, EmailMessage, EmailProvider};
use uuid::Uuid;

/// SMTP email provider.
///
/// The transport is built once and pools its connections. Sends run on the blocking
/// pool so a slow relay never stalls the runtime.
#[derive(Clone)]
pub struct SmtpEmailProvider {
    transport: SmtpTransport,
    from: Mailbox,
    message_id_domain: String,
}

impl std::fmt::Debug for SmtpEmailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailProvider")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpEmailProvider {
    /// Create a new SMTP email provider.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::Transport`] if the relay cannot be configured and
    /// [`EmailError::Rejected`] if the sender address is invalid.
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: String,
        password: String,
        from_email: &str,
        from_name: &str,
    ) -> Result<Self, EmailError> {
        let transport = SmtpTransport::relay(smtp_host)
            .map_err(|e| EmailError::Transport(format!("SMTP relay error: {e}")))?
            .port(smtp_port)
            .credentials(Credentials::new(username, password))
            .build();
        let from: Mailbox = format!("{from_name} <{from_email}>")
            .parse()
            .map_err(|e| EmailError::Rejected(format!("Invalid from address: {e}")))?;
        let message_id_domain = from.email.domain().to_string();
        Ok(Self {
            transport,
            from,
            message_id_domain,
        })
    }

    fn build(&self, message: &EmailMessage, message_id: &str) -> Result<Message, EmailError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| EmailError::Rejected(format!("Invalid to address: {e}")))?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .message_id(Some(message_id.to_string()));
        let built = match &message.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.text_body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.text_body.clone()),
        };
        built.map_err(|e| EmailError::Rejected(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
        let message_id = format!("<{}@{}>", Uuid::new_v4().simple(), self.message_id_domain);
        let email = self.build(message, &message_id)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| EmailError::Transport(format!("Email task failed: {e}")))?
            .map_err(|e| {
                if e.is_permanent() {
                    EmailError::Rejected(e.to_string())
                } else {
                    EmailError::Transport(e.to_string())
                }
            })?;
        Ok(message_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn provider() -> SmtpEmailProvider {
        SmtpEmailProvider::new(
            "localhost",
            2525,
            "user".into(),
            "pass".into(),
            "bookings@simbay.example",
            "Simbay",
        )
        .unwrap()
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let message = EmailMessage {
            to: "not an address".into(),
            subject: "Hi".into(),
            text_body: "Body".into(),
            html_body: None,
        };
        assert!(matches!(
            provider().build(&message, "<x@simbay.example>"),
            Err(EmailError::Rejected(_))
        ));
    }

    #[test]
    fn message_carries_the_generated_id() {
        let message = EmailMessage {
            to: "golfer@example.com".into(),
            subject: "You're booked".into(),
            text_body: "See you soon".into(),
            html_body: Some("<p>See you soon</p>".into()),
        };
        let built = provider().build(&message, "<abc@simbay.example>").unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();
        assert!(raw.contains("Message-ID: <abc@simbay.example>"));
        assert_eq!(provider().message_id_domain, "simbay.example");
    }
}
