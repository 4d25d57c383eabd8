//! Outbound mail capability.
//!
//! The pipeline treats mail transport as a black box behind [`Mailer`]. The
//! bundled [`HttpMailer`] renders the scratch template and hands the result
//! to an HTTP mail service.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::campaign::CampaignId;

/// Everything the mailer needs to send one campaign email.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub to: String,
    /// Rendered-template location in the scratch directory.
    pub template_path: PathBuf,
    pub display_name: String,
    pub subject: String,
    pub action_link: Option<String>,
    pub campaign_id: CampaignId,
    pub tracking_pixel_url: String,
}

/// Result of a single send. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, request: &SendRequest) -> SendOutcome;
}

/// Substitute the per-recipient placeholders in a template body.
///
/// Supported placeholders: `{{name}}`, `{{email}}`, `{{action_link}}` and
/// `{{tracking_pixel}}`. When the body has no `{{tracking_pixel}}` slot the
/// pixel image is appended.
pub fn render(body: &str, request: &SendRequest) -> String {
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
        request.tracking_pixel_url
    );
    let has_pixel_slot = body.contains("{{tracking_pixel}}");

    let mut html = body
        .replace("{{name}}", &request.display_name)
        .replace("{{email}}", &request.to)
        .replace(
            "{{action_link}}",
            request.action_link.as_deref().unwrap_or("#"),
        )
        .replace("{{tracking_pixel}}", &pixel);

    if !has_pixel_slot {
        html.push_str(&pixel);
    }
    html
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MailPayload<'a> {
    to: &'a str,
    to_name: &'a str,
    subject: &'a str,
    html: &'a str,
    campaign_id: &'a str,
}

/// Mailer that POSTs rendered messages as JSON to a mail service.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpMailer {
    pub fn new(client: Client, endpoint: String, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    async fn deliver(&self, request: &SendRequest) -> Result<()> {
        let body = tokio::fs::read_to_string(&request.template_path)
            .await
            .with_context(|| format!("Failed to read template {}", request.template_path.display()))?;
        let html = render(&body, request);

        let payload = MailPayload {
            to: &request.to,
            to_name: &request.display_name,
            subject: &request.subject,
            html: &html,
            campaign_id: request.campaign_id.as_str(),
        };

        self.client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("Mail service request failed")?
            .error_for_status()
            .context("Mail service rejected message")?;

        Ok(())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, request: &SendRequest) -> SendOutcome {
        match self.deliver(request).await {
            Ok(()) => {
                debug!(to = %request.to, campaign_id = %request.campaign_id, "mail_sent");
                SendOutcome::sent()
            }
            Err(e) => {
                warn!(
                    to = %request.to,
                    campaign_id = %request.campaign_id,
                    error = %format!("{:#}", e),
                    "mail_send_failed"
                );
                SendOutcome::failed(format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(template_path: PathBuf) -> SendRequest {
        SendRequest {
            to: "ana@example.com".to_string(),
            template_path,
            display_name: "Ana".to_string(),
            subject: "Tonight's specials".to_string(),
            action_link: Some("http://t/click/abc/ana@example.com".to_string()),
            campaign_id: CampaignId::from("c-1"),
            tracking_pixel_url: "http://t/open/c-1/ana@example.com/image.png".to_string(),
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let html = render(
            "<p>Hi {{name}}</p><a href=\"{{action_link}}\">Menu</a>{{tracking_pixel}}",
            &request(PathBuf::new()),
        );
        assert!(html.contains("Hi Ana"));
        assert!(html.contains("href=\"http://t/click/abc/ana@example.com\""));
        assert_eq!(html.matches("image.png").count(), 1);
    }

    #[test]
    fn test_render_appends_pixel_when_no_slot() {
        let mut req = request(PathBuf::new());
        req.action_link = None;
        let html = render("<a href=\"{{action_link}}\">x</a>", &req);
        assert!(html.contains("href=\"#\""));
        assert!(html.ends_with("style=\"display:none\" />"));
    }

    #[tokio::test]
    async fn test_http_mailer_posts_rendered_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_partial_json(serde_json::json!({
                "to": "ana@example.com",
                "subject": "Tonight's specials",
                "campaignId": "c-1"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.html");
        std::fs::write(&template_path, "<p>Hello {{name}}</p>").unwrap();

        let mailer = HttpMailer::new(
            Client::new(),
            format!("{}/send", server.uri()),
            Duration::from_secs(5),
        );
        let outcome = mailer.send(&request(template_path)).await;
        assert_eq!(outcome, SendOutcome::sent());
    }

    #[tokio::test]
    async fn test_http_mailer_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.html");
        std::fs::write(&template_path, "body").unwrap();

        let mailer = HttpMailer::new(Client::new(), server.uri(), Duration::from_secs(5));
        let outcome = mailer.send(&request(template_path)).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }
}
