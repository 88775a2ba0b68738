use crate::config::EmailConfig;
use crate::errors::ServiceError;
use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

/// Client for the transactional email provider.
#[derive(Clone)]
pub struct MailerClient {
    http: reqwest::Client,
    cfg: EmailConfig,
}

impl MailerClient {
    pub fn new(cfg: EmailConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("mailer http client"),
            cfg,
        }
    }

    pub fn owner_email(&self) -> &str {
        &self.cfg.owner_email
    }

    /// Sends one fully rendered HTML email.
    #[instrument(skip(self, html), fields(to = %to, subject = %subject))]
    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), ServiceError> {
        let body = SendEmailRequest {
            from: &self.cfg.from_address,
            to: vec![to],
            subject,
            html,
        };

        let response = self
            .http
            .post(format!("{}/emails", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::EmailError(format!("send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::EmailError(format!(
                "email provider returned HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}
