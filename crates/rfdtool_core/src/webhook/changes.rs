//! Field-level diff between stored and incoming documents.

use super::payload::{WebhookEvent, WebhookPayload};
use crate::model::rfd::{Rfd, RfdState};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange<T> {
    pub old: T,
    pub new: T,
}

impl<T: PartialEq + Clone> FieldChange<T> {
    fn between(old: &T, new: &T) -> Option<Self> {
        (old != new).then(|| Self {
            old: old.clone(),
            new: new.clone(),
        })
    }
}

/// Changed fields of an update; content only reports that it changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfdChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<FieldChange<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FieldChange<RfdState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<FieldChange<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<FieldChange<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion: Option<FieldChange<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content: bool,
}

impl RfdChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Compares the tracked fields of `old` and `new`.
///
/// Returns `None` when nothing tracked differs. Lists compare in order.
pub fn detect_changes(old: &Rfd, new: &Rfd) -> Option<RfdChanges> {
    let changes = RfdChanges {
        title: FieldChange::between(&old.title, &new.title),
        state: FieldChange::between(&old.state, &new.state),
        authors: FieldChange::between(&old.authors, &new.authors),
        tags: FieldChange::between(&old.tags, &new.tags),
        discussion: FieldChange::between(&old.discussion, &new.discussion),
        content: old.content_md != new.content_md,
    };
    (!changes.is_empty()).then_some(changes)
}

/// Builds the `rfd.updated` payload, or `None` when no webhook is owed.
pub fn build_updated_payload(old: &Rfd, new: &Rfd, site_url: &str) -> Option<WebhookPayload> {
    let changes = detect_changes(old, new)?;
    Some(WebhookPayload {
        event: WebhookEvent::Updated,
        timestamp: Utc::now(),
        rfd: new.clone(),
        link: new.permalink(site_url),
        changes: Some(changes),
        skip_discussion: false,
    })
}
