//! Blocking, signed webhook delivery.

use super::changes::build_updated_payload;
use super::payload::{WebhookPayload, WebhookResponse};
use super::{WebhookError, WebhookResult};
use crate::model::rfd::Rfd;
use hmac::{Hmac, Mac};
use log::{error, info, warn};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of the raw body>`.
pub const SIGNATURE_HEADER: &str = "X-RFD-Signature";
const SIGNATURE_PREFIX: &str = "sha256=";
const USER_AGENT: &str = concat!("rfdtool-webhook/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    /// Signing secret; requests go unsigned without one.
    pub secret: Option<String>,
    pub timeout: Duration,
}

pub struct WebhookClient {
    settings: WebhookSettings,
    site_url: String,
    http: Client,
}

impl WebhookClient {
    pub fn new(settings: WebhookSettings, site_url: impl Into<String>) -> WebhookResult<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            settings,
            site_url: site_url.into(),
            http,
        })
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// Announces a new document and waits for the receiver's answer.
    pub fn send_created(&self, rfd: &Rfd) -> WebhookResult<WebhookResponse> {
        self.deliver(&WebhookPayload::created(rfd, &self.site_url))
    }

    /// Announces an update; returns `Ok(None)` without a request when no
    /// tracked field changed.
    pub fn send_updated(&self, old: &Rfd, new: &Rfd) -> WebhookResult<Option<WebhookResponse>> {
        match build_updated_payload(old, new, &self.site_url) {
            Some(payload) => self.deliver(&payload).map(Some),
            None => {
                info!(
                    "event=webhook_deliver module=webhook status=skipped event_type=rfd.updated id={} reason=no_changes",
                    new.id
                );
                Ok(None)
            }
        }
    }

    /// POSTs `payload` and decodes the response.
    ///
    /// Non-2xx statuses, non-JSON bodies and `success: false` are errors.
    pub fn deliver(&self, payload: &WebhookPayload) -> WebhookResult<WebhookResponse> {
        let started_at = Instant::now();
        let event = payload.event.as_str();
        let id = payload.rfd.id;
        info!(
            "event=webhook_deliver module=webhook status=start event_type={} id={}",
            event, id
        );

        let result = self.post(payload);
        match &result {
            Ok(response) => info!(
                "event=webhook_deliver module=webhook status=ok event_type={} id={} discussion={} duration_ms={}",
                event,
                id,
                response.discussion_url().is_some(),
                started_at.elapsed().as_millis()
            ),
            Err(WebhookError::Rejected(message)) => warn!(
                "event=webhook_deliver module=webhook status=error event_type={} id={} error_code=rejected duration_ms={} error={}",
                event,
                id,
                started_at.elapsed().as_millis(),
                message
            ),
            Err(err) => error!(
                "event=webhook_deliver module=webhook status=error event_type={} id={} duration_ms={} error={}",
                event,
                id,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn post(&self, payload: &WebhookPayload) -> WebhookResult<WebhookResponse> {
        let body = serde_json::to_vec(payload).map_err(WebhookError::Encode)?;

        let mut request = self
            .http
            .post(&self.settings.url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(secret) = self.settings.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, format!("{SIGNATURE_PREFIX}{}", sign(&body, secret)?));
        }

        let response = request.body(body).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let decoded: WebhookResponse =
            serde_json::from_str(&text).map_err(WebhookError::InvalidResponse)?;
        if !decoded.success {
            return Err(WebhookError::Rejected(
                decoded
                    .error
                    .unwrap_or_else(|| "receiver reported failure".to_string()),
            ));
        }
        Ok(decoded)
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(body: &[u8], secret: &str) -> WebhookResult<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `sha256=<hex>` signature header in constant time.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(encoded) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{sign, verify_signature};

    #[test]
    fn signature_matches_known_vector() {
        // RFC 4231 test case 2.
        let signature = sign(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_own_signature_and_rejects_tampering() {
        let body = br#"{"event":"rfd.created"}"#;
        let header = format!("sha256={}", sign(body, "s3cret").unwrap());
        assert!(verify_signature(body, &header, "s3cret"));
        assert!(!verify_signature(body, &header, "other"));
        assert!(!verify_signature(b"{}", &header, "s3cret"));
        assert!(!verify_signature(body, header.trim_start_matches("sha256="), "s3cret"));
        assert!(!verify_signature(body, "sha256=zz", "s3cret"));
    }
}
