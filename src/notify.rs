//! Deployment notification email.
use crate::config::runtime::{self, Config};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("send notification: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("configuration: {0}")]
    Config(#[from] runtime::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub app_name: String,
    pub digest: String,
    pub environment: String,
    pub recipients: Vec<String>,
}

/// Request body of the email transport.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Email {
    pub from: String,
    /// Comma separated, all recipients in one message.
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub message_stream: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), Error>;
}

/// HTTP email API authenticated with a server token header.
///
/// The token is only required once something is sent.
pub struct PostmarkTransport {
    client: reqwest::Client,
    url: String,
    server_token: Option<String>,
}

impl PostmarkTransport {
    pub fn new(url: impl Into<String>, server_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            server_token: Some(server_token.into()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: cfg.notification.url.clone(),
            server_token: cfg.notification_server_token().ok().map(str::to_string),
        }
    }
}

#[async_trait]
impl Transport for PostmarkTransport {
    async fn send(&self, email: &Email) -> Result<(), Error> {
        let server_token = self
            .server_token
            .as_deref()
            .ok_or(runtime::Error::Missing("notification.server_token"))?;
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", server_token)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("Notification response {status}: {body}");
        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

pub fn compose(
    request: &NotificationRequest,
    from: &str,
    message_stream: &str,
    at: DateTime<Utc>,
) -> Email {
    let at = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let NotificationRequest {
        app_name,
        digest,
        environment,
        recipients,
    } = request;

    Email {
        from: from.to_string(),
        to: recipients.join(","),
        subject: format!("Deployment of {app_name} to {environment}"),
        html_body: format!(
            "<h1>Deployment of {app_name}</h1>\
             <p><b>Application:</b> {app_name}<br>\
             <b>Environment:</b> {environment}<br>\
             <b>Tag:</b> {digest}<br>\
             <b>Deployed at:</b> {at}</p>"
        ),
        text_body: format!(
            "Deployment of {app_name}\n\
             Application: {app_name}\n\
             Environment: {environment}\n\
             Tag: {digest}\n\
             Deployed at: {at}\n"
        ),
        message_stream: message_stream.to_string(),
    }
}

/// Send one email to all recipients. No recipients means nothing to do.
pub async fn notify(
    transport: &dyn Transport,
    cfg: &Config,
    request: &NotificationRequest,
    at: DateTime<Utc>,
) -> Result<(), crate::Error> {
    if request.recipients.is_empty() {
        info!("No notification recipients");
        return Ok(());
    }
    let email = compose(
        request,
        cfg.notification_from()?,
        &cfg.notification.message_stream,
        at,
    );
    info!("Notifying {}", email.to);
    transport.send(&email).await?;
    Ok(())
}
