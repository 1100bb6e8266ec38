// src/clients/mailer.rs

//! Mail transport collaborator.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError>;
}

/// Sends mail through a JSON HTTP mail API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<MailAttachment<'a>>,
}

#[derive(Serialize)]
struct MailAttachment<'a> {
    filename: &'a str,
    content_type: &'static str,
    /// Base64 of the file bytes.
    content: String,
}

impl HttpMailer {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        api_key: Option<String>,
        from: String,
    ) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            AppError::InternalServerError(format!("invalid mail endpoint {endpoint}: {e}"))
        })?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError> {
        if mail.recipients.is_empty() {
            return Err(AppError::BadRequest("mail has no recipients".to_string()));
        }

        let mut attachments = Vec::new();
        if let Some(att) = &mail.attachment {
            let bytes = tokio::fs::read(&att.path).await?;
            attachments.push(MailAttachment {
                filename: &att.file_name,
                content_type: "text/html",
                content: STANDARD.encode(bytes),
            });
        }

        let body = MailRequest {
            from: &self.from,
            to: &mail.recipients,
            subject: &mail.subject,
            html: &mail.html_body,
            attachments,
        };

        let mut req = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::InternalServerError(format!(
                "mail api returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
