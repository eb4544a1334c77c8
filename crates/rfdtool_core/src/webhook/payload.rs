//! Webhook wire types.

use super::changes::RfdChanges;
use crate::model::rfd::Rfd;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "rfd.created")]
    Created,
    #[serde(rename = "rfd.updated")]
    Updated,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "rfd.created",
            Self::Updated => "rfd.updated",
        }
    }
}

/// Body POSTed to the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    pub rfd: Rfd,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<RfdChanges>,
    /// Tells the receiver not to provision a discussion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_discussion: bool,
}

impl WebhookPayload {
    /// `rfd.created` payload; skips discussion provisioning when the
    /// document already links one.
    pub fn created(rfd: &Rfd, site_url: &str) -> Self {
        Self {
            event: WebhookEvent::Created,
            timestamp: Utc::now(),
            rfd: rfd.clone(),
            link: rfd.permalink(site_url),
            changes: None,
            skip_discussion: !rfd.discussion.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
}

/// Body expected back from the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion: Option<DiscussionInfo>,
}

impl WebhookResponse {
    /// Discussion URL carried by a successful response.
    pub fn discussion_url(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.discussion
            .as_ref()
            .map(|discussion| discussion.url.trim())
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{WebhookPayload, WebhookResponse};
    use crate::model::rfd::{Rfd, RfdId, RfdState};

    #[test]
    fn created_payload_skips_discussion_only_when_linked() {
        let mut rfd = Rfd::new(RfdId::new(3).unwrap(), "T", RfdState::Discussion);
        let payload = WebhookPayload::created(&rfd, "https://rfd.example.com");
        assert!(!payload.skip_discussion);
        assert_eq!(payload.link, "https://rfd.example.com/rfd/0003");

        rfd.discussion = "https://chat.example.com/d/3".to_string();
        let payload = WebhookPayload::created(&rfd, "https://rfd.example.com");
        assert!(payload.skip_discussion);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "rfd.created");
        assert_eq!(json["skip_discussion"], true);
        assert_eq!(json["rfd"]["id"], "0003");
    }

    #[test]
    fn discussion_url_requires_success_and_a_url() {
        let ok: WebhookResponse = serde_json::from_str(
            r#"{"success":true,"discussion":{"id":"d1","url":"https://chat.example.com/d1"}}"#,
        )
        .unwrap();
        assert_eq!(ok.discussion_url(), Some("https://chat.example.com/d1"));

        let failed: WebhookResponse = serde_json::from_str(
            r#"{"success":false,"error":"nope","discussion":{"id":"d1","url":"https://x"}}"#,
        )
        .unwrap();
        assert_eq!(failed.discussion_url(), None);

        let empty: WebhookResponse =
            serde_json::from_str(r#"{"success":true,"discussion":{"id":"","url":""}}"#).unwrap();
        assert_eq!(empty.discussion_url(), None);
    }
}
