use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub const SIGNUP_TEMPLATE: &str = "signup.msg";
pub const RESETPW_TEMPLATE: &str = "resetpw.msg";

/// Outbound message: a named template, its arguments and the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    pub template: String,
    pub args: BTreeMap<String, String>,
    pub to: String,
}

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Unknown mail template: {0}")]
    UnknownTemplate(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, request: &MailRequest) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

struct Template {
    subject: &'static str,
    body: &'static str,
}

fn builtin_template(name: &str) -> Option<Template> {
    match name {
        SIGNUP_TEMPLATE => Some(Template {
            subject: "Confirm your account",
            body: "Welcome!\n\n\
                   Please confirm your email address by following the link below:\n\n\
                   {{link}}/{{id}}\n\n\
                   If you did not sign up, please ignore this email.\n",
        }),
        RESETPW_TEMPLATE => Some(Template {
            subject: "Reset your password",
            body: "We received a request to reset your password.\n\n\
                   Follow the link below to choose a new one:\n\n\
                   {{link}}/{{id}}\n\n\
                   If you did not request a reset, please ignore this email.\n",
        }),
        _ => None,
    }
}

/// Render a built-in template, substituting `{{name}}` with `args[name]`.
pub fn render(request: &MailRequest) -> Result<RenderedMail, MailError> {
    let template = builtin_template(&request.template)
        .ok_or_else(|| MailError::UnknownTemplate(request.template.clone()))?;

    let mut body = template.body.to_string();
    for (name, value) in &request.args {
        body = body.replace(&format!("{{{{{}}}}}", name), value);
    }

    Ok(RenderedMail {
        subject: template.subject.to_string(),
        body,
    })
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().to_string(),
        );

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::Delivery(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, request: &MailRequest) -> Result<(), MailError> {
        let rendered = render(request)?;

        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| MailError::Address(e.to_string()))?,
            )
            .to(request
                .to
                .parse()
                .map_err(|e: lettre::address::AddressError| MailError::Address(e.to_string()))?)
            .subject(rendered.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| MailError::Delivery(e.to_string()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| MailError::Delivery(e.to_string()))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    to = %request.to,
                    template = %request.template,
                    "Email sent successfully"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    to = %request.to,
                    "Failed to send email"
                );
                Err(MailError::Delivery(e.to_string()))
            }
        }
    }
}

/// Development mailer: renders the message and writes it to the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, request: &MailRequest) -> Result<(), MailError> {
        let rendered = render(request)?;
        tracing::info!(
            to = %request.to,
            template = %request.template,
            subject = %rendered.subject,
            body = %rendered.body,
            "Email not delivered (no SMTP configured)"
        );
        Ok(())
    }
}

/// Keeps every request in memory. Can be switched to fail deliveries.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<MailRequest>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<MailRequest> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn sent_to(&self, to: &str) -> Vec<MailRequest> {
        self.sent().into_iter().filter(|r| r.to == to).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, request: &MailRequest) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("recording mailer set to fail".to_string()));
        }
        render(request)?;
        self.sent
            .lock()
            .map_err(|e| MailError::Delivery(e.to_string()))?
            .push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn request(template: &str) -> MailRequest {
        MailRequest {
            template: template.to_string(),
            args: BTreeMap::from([
                ("link".to_string(), "https://example.com/confirm".to_string()),
                ("id".to_string(), "abc123".to_string()),
            ]),
            to: "user@example.com".to_string(),
        }
    }

    #[test]
    fn renders_link_and_id() {
        let rendered = render(&request(SIGNUP_TEMPLATE)).unwrap();
        assert_eq!(rendered.subject, "Confirm your account");
        assert!(rendered.body.contains("https://example.com/confirm/abc123"));
        assert!(!rendered.body.contains("{{"));

        let rendered = render(&request(RESETPW_TEMPLATE)).unwrap();
        assert!(rendered.body.contains("https://example.com/confirm/abc123"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(matches!(
            render(&request("welcome.msg")),
            Err(MailError::UnknownTemplate(name)) if name == "welcome.msg"
        ));
    }

    #[tokio::test]
    async fn recording_mailer_records_and_fails_on_demand() {
        let mailer = RecordingMailer::new();
        mailer.send(&request(SIGNUP_TEMPLATE)).await.unwrap();
        assert_eq!(mailer.sent_to("user@example.com").len(), 1);

        mailer.set_failing(true);
        assert!(mailer.send(&request(SIGNUP_TEMPLATE)).await.is_err());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[test]
    fn test_smtp_mailer_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "mailer@example.com".to_string(),
            password: SecretString::new("test_password".to_string()),
            from: "no-reply@example.com".to_string(),
        };

        assert!(SmtpMailer::new(&config).is_ok());
    }
}
