//! Release announcements for appdrop.
//!
//! This crate posts a build's changelog to a chat or HTTP endpoint once the
//! build is published. Slack, Discord and generic JSON webhooks are
//! supported. When a secret is configured the request body is signed with
//! HMAC-SHA256 and the signature is sent in [`SIGNATURE_HEADER`].
//!
//! # Example
//!
//! ```no_run
//! use appdrop_webhook::{WebhookConfig, WebhookType, changelog_payload, send_webhook};
//!
//! let config = WebhookConfig {
//!     url: "https://hooks.slack.com/services/...".to_string(),
//!     webhook_type: WebhookType::Slack,
//!     mentions: vec!["@qa-team".to_string()],
//!     ..Default::default()
//! };
//!
//! let payload = changelog_payload("Sample build-debug-42", "• fixed login crash\n", &config, None);
//! send_webhook(&config, &payload).expect("send");
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

/// Header carrying the body signature when a secret is configured
pub const SIGNATURE_HEADER: &str = "X-Appdrop-Signature";

/// Default user agent for webhook requests
pub const USER_AGENT: &str = concat!("appdrop/", env!("CARGO_PKG_VERSION"));

type HmacSha256 = Hmac<Sha256>;

/// Slack attachment color of a build announcement
const SLACK_COLOR: &str = "good";

/// Discord embed color of a build announcement (green)
const DISCORD_COLOR: u32 = 0x00ff00;

/// Webhook type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookType {
    /// Generic webhook (POST JSON)
    #[default]
    Generic,
    /// Slack incoming webhook
    Slack,
    /// Discord webhook
    Discord,
}

/// Webhook configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL
    pub url: String,
    /// Type of webhook
    #[serde(default)]
    pub webhook_type: WebhookType,
    /// Secret used to sign request bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Users or groups mentioned under the changelog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            webhook_type: WebhookType::default(),
            secret: None,
            timeout_secs: default_timeout(),
            mentions: Vec::new(),
        }
    }
}

/// Webhook payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Main message
    pub message: String,
    /// Optional title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Build name, usually the build tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Mentioned users
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mentions: Vec<String>,
}

/// Turns issue keys in changelog text into links.
#[derive(Debug, Clone)]
pub struct IssueLinker {
    url_prefix: String,
    pattern: Regex,
}

impl IssueLinker {
    /// `number_pattern` matches an issue key such as `APP-[0-9]+`; a match is
    /// linked to `url_prefix` followed by the key.
    pub fn new(url_prefix: &str, number_pattern: &str) -> Result<Self> {
        let pattern = Regex::new(number_pattern)
            .with_context(|| format!("invalid issue number pattern {number_pattern:?}"))?;
        Ok(Self {
            url_prefix: url_prefix.to_string(),
            pattern,
        })
    }

    pub fn link(&self, text: &str, webhook_type: WebhookType) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let key = &caps[0];
                let url = format!("{}{key}", self.url_prefix);
                match webhook_type {
                    WebhookType::Slack => format!("<{url}|{key}>"),
                    WebhookType::Discord | WebhookType::Generic => format!("[{key}]({url})"),
                }
            })
            .into_owned()
    }
}

/// Build the announcement for a published build.
pub fn changelog_payload(
    build: &str,
    changelog: &str,
    config: &WebhookConfig,
    links: Option<&IssueLinker>,
) -> WebhookPayload {
    let changelog = match links {
        Some(linker) => linker.link(changelog, config.webhook_type),
        None => changelog.to_string(),
    };

    let mut message = changelog.trim_end().to_string();
    if !config.mentions.is_empty() {
        message.push_str("\n\n");
        message.push_str(&config.mentions.join(" "));
    }

    WebhookPayload {
        message,
        title: Some(format!("New build: {build}")),
        build: Some(build.to_string()),
        mentions: config.mentions.clone(),
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("failed to initialize HMAC")?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Request body for the configured webhook type.
pub fn render_body(config: &WebhookConfig, payload: &WebhookPayload) -> Result<String> {
    match config.webhook_type {
        WebhookType::Generic => Ok(serde_json::to_string(payload)?),
        WebhookType::Slack => slack_payload(payload),
        WebhookType::Discord => discord_payload(payload),
    }
}

/// Send a webhook notification
pub fn send_webhook(config: &WebhookConfig, payload: &WebhookPayload) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to create HTTP client")?;

    let body = render_body(config, payload)?;

    let mut request = client
        .post(&config.url)
        .header("Content-Type", "application/json");
    if let Some(secret) = config.secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = sign_body(secret, body.as_bytes())?;
        request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
    }

    let response = request
        .body(body)
        .send()
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "webhook request failed with status {}: {}",
            response.status(),
            response.text().unwrap_or_default()
        ));
    }

    Ok(())
}

/// Format payload for Slack
fn slack_payload(payload: &WebhookPayload) -> Result<String> {
    let mut fields = vec![];
    if let Some(build) = &payload.build {
        fields.push(json!({
            "title": "Build",
            "value": build,
            "short": true
        }));
    }

    let slack_json = json!({
        "attachments": [{
            "color": SLACK_COLOR,
            "title": payload.title.as_deref().unwrap_or("appdrop"),
            "text": payload.message,
            "mrkdwn_in": ["text"],
            "fields": fields
        }]
    });

    Ok(serde_json::to_string(&slack_json)?)
}

/// Format payload for Discord
fn discord_payload(payload: &WebhookPayload) -> Result<String> {
    let mut fields = vec![];
    if let Some(build) = &payload.build {
        fields.push(json!({
            "name": "Build",
            "value": build,
            "inline": true
        }));
    }

    let discord_json = json!({
        "embeds": [{
            "title": payload.title.as_deref().unwrap_or("appdrop"),
            "description": payload.message,
            "color": DISCORD_COLOR,
            "fields": fields
        }]
    });

    Ok(serde_json::to_string(&discord_json)?)
}
