//! Outbound email delivery.
//!
//! # Architecture
//!
//! - [`Mailer`]: Core trait, hands one rendered message to a delivery service
//!   and returns the service's disposition code
//! - [`SendGridMailer`]: [`Mailer`] over the SendGrid v3 `mail/send` endpoint
//! - [`NewsletterSender`]: Builds newsletter messages from a fixed sender
//!   address and reports success as a boolean
//!
//! A send counts as delivered only when the service answers `202 Accepted`.

use reqwest::Client;
use serde_json::json;
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

const SENDGRID_API_ROOT: &str = "https://api.sendgrid.com";

/// Disposition code meaning the message was queued for delivery.
pub const ACCEPTED: u16 = 202;

/// A fully rendered HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Trait for email delivery backends.
pub trait Mailer {
    /// Submit `mail` and return the service's disposition code.
    async fn send(&self, mail: &OutgoingMail) -> Result<u16, Box<dyn Error>>;
}

/// SendGrid v3 client.
#[derive(Clone)]
pub struct SendGridMailer {
    client: Client,
    api_key: String,
    api_root: String,
}

impl std::fmt::Debug for SendGridMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGridMailer")
            .field("api_root", &self.api_root)
            .finish_non_exhaustive()
    }
}

impl SendGridMailer {
    pub fn new(api_key: &str) -> Result<Self, Box<dyn Error>> {
        Self::with_api_root(api_key, SENDGRID_API_ROOT)
    }

    pub fn with_api_root(api_key: &str, api_root: &str) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_root: api_root.trim_end_matches('/').to_string(),
        })
    }
}

impl Mailer for SendGridMailer {
    #[instrument(level = "info", skip_all, fields(to = %mail.to))]
    async fn send(&self, mail: &OutgoingMail) -> Result<u16, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = json!({
            "personalizations": [{ "to": [{ "email": mail.to }] }],
            "from": { "email": mail.from },
            "subject": mail.subject,
            "content": [{ "type": "text/html", "value": mail.html }],
        });
        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.api_root))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        if status != ACCEPTED {
            let detail = response.text().await.unwrap_or_default();
            warn!(status, detail = %crate::utils::truncate_for_log(&detail, 300), "SendGrid did not accept message");
        }
        info!(status, elapsed_ms = t0.elapsed().as_millis() as u64, "SendGrid responded");
        Ok(status)
    }
}

/// Subject line for a newsletter about `sport`.
pub fn newsletter_subject(sport: &str) -> String {
    format!("Your {sport} Newsletter Update")
}

/// Sends newsletters from a fixed address through any [`Mailer`].
#[derive(Debug)]
pub struct NewsletterSender<M> {
    mailer: M,
    from: String,
}

impl<M: Mailer> NewsletterSender<M> {
    pub fn new(mailer: M, from: &str) -> Self {
        Self {
            mailer,
            from: from.to_string(),
        }
    }

    #[cfg(test)]
    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Send one newsletter.
    ///
    /// # Arguments
    ///
    /// * `recipient` - Destination address
    /// * `html` - Rendered newsletter body
    /// * `sport` - Used in the subject line
    ///
    /// # Returns
    ///
    /// `true` only if the mail service accepted the message (HTTP 202).
    #[instrument(level = "info", skip(self, html))]
    pub async fn send_newsletter(&self, recipient: &str, html: &str, sport: &str) -> bool {
        let mail = OutgoingMail {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: newsletter_subject(sport),
            html: html.to_string(),
        };
        match self.mailer.send(&mail).await {
            Ok(ACCEPTED) => {
                info!(%recipient, %sport, "Newsletter sent");
                true
            }
            Ok(status) => {
                warn!(%recipient, status, "Newsletter not accepted");
                false
            }
            Err(e) => {
                error!(%recipient, error = %e, "Error sending newsletter");
                false
            }
        }
    }
}
