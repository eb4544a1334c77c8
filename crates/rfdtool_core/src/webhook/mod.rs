//! Discussion-provisioning webhook.
//!
//! # Responsibility
//! - Deliver signed `rfd.created` / `rfd.updated` notifications.
//! - Decide from a field diff whether an update owes a notification.
//!
//! # Invariants
//! - Delivery failures never undo persistence; callers log and continue.
//! - Bodies are signed exactly as sent.

pub mod changes;
pub mod client;
pub mod payload;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use changes::{build_updated_payload, detect_changes, FieldChange, RfdChanges};
pub use client::{sign, verify_signature, WebhookClient, WebhookSettings, SIGNATURE_HEADER};
pub use payload::{DiscussionInfo, WebhookEvent, WebhookPayload, WebhookResponse};

pub type WebhookResult<T> = Result<T, WebhookError>;

#[derive(Debug)]
pub enum WebhookError {
    Http(reqwest::Error),
    Encode(serde_json::Error),
    /// The endpoint answered with a non-2xx status.
    Status { status: u16, body: String },
    /// The endpoint answered 2xx with a body that is not a webhook response.
    InvalidResponse(serde_json::Error),
    /// The endpoint answered `success: false`.
    Rejected(String),
    InvalidSecret,
}

impl Display for WebhookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(err) => write!(f, "webhook delivery failed: {err}"),
            Self::Encode(err) => write!(f, "cannot encode webhook payload: {err}"),
            Self::Status { status, body } => {
                write!(f, "webhook returned status {status}: {body}")
            }
            Self::InvalidResponse(err) => write!(f, "webhook response is not valid JSON: {err}"),
            Self::Rejected(message) => write!(f, "webhook receiver reported failure: {message}"),
            Self::InvalidSecret => write!(f, "webhook secret cannot be used as an HMAC key"),
        }
    }
}

impl Error for WebhookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Encode(err) | Self::InvalidResponse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WebhookError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}
