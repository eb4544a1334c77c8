//! RFD document model.
//!
//! # Responsibility
//! - Define the canonical document record shared by stores, webhook and
//!   authoring flows.
//! - Own identifier parsing/rendering and lifecycle state parsing.
//!
//! # Invariants
//! - `RfdId` is never zero and always renders zero-padded to at least 4 digits.
//! - `RfdState` only holds the six lifecycle values; unknown input is rejected.
//! - `id` is immutable once a document has been stored.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Longest accepted decimal representation of an identifier.
const MAX_ID_DIGITS: usize = 9;

/// Sequential document identifier.
///
/// Rendered with `{:04}`. Values above 9999 keep their natural width, so the
/// display contract widens instead of truncating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RfdId(u32);

impl RfdId {
    /// First identifier handed out by an empty store.
    pub const FIRST: RfdId = RfdId(1);

    /// Builds an identifier from its numeric value.
    pub fn new(value: u32) -> Result<Self, RfdValidationError> {
        if value == 0 {
            return Err(RfdValidationError::InvalidId("0".to_string()));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Returns the identifier that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Parses decimal digits (`"12"`, `"0012"`) into an identifier.
    pub fn parse(value: &str) -> Result<Self, RfdValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_ID_DIGITS
            || !trimmed.chars().all(|ch| ch.is_ascii_digit())
        {
            return Err(RfdValidationError::InvalidId(value.to_string()));
        }
        let numeric = trimmed
            .parse::<u32>()
            .map_err(|_| RfdValidationError::InvalidId(value.to_string()))?;
        Self::new(numeric).map_err(|_| RfdValidationError::InvalidId(value.to_string()))
    }
}

impl Display for RfdId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for RfdId {
    type Err = RfdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RfdId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RfdId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RfdId::parse(&raw).map_err(de::Error::custom)
    }
}

/// Lifecycle state of an RFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RfdState {
    PreDiscussion,
    Ideation,
    Discussion,
    Published,
    Committed,
    Abandoned,
}

impl RfdState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreDiscussion => "prediscussion",
            Self::Ideation => "ideation",
            Self::Discussion => "discussion",
            Self::Published => "published",
            Self::Committed => "committed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a state name case-insensitively.
    pub fn parse(value: &str) -> Result<Self, RfdValidationError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prediscussion" => Ok(Self::PreDiscussion),
            "ideation" => Ok(Self::Ideation),
            "discussion" => Ok(Self::Discussion),
            "published" => Ok(Self::Published),
            "committed" => Ok(Self::Committed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(RfdValidationError::InvalidState(value.to_string())),
        }
    }

    /// Whether a document in this state may be published without a
    /// discussion link.
    pub fn allows_missing_discussion(self) -> bool {
        matches!(self, Self::Ideation | Self::PreDiscussion)
    }
}

impl Display for RfdState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RfdState {
    type Err = RfdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for RfdState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RfdState::parse(&raw).map_err(de::Error::custom)
    }
}

/// Validation failures raised before any persistence happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RfdValidationError {
    InvalidId(String),
    InvalidState(String),
    MissingTitle,
    MissingField(&'static str),
}

impl Display for RfdValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(value) => write!(f, "invalid rfd id `{value}`"),
            Self::InvalidState(value) => write!(
                f,
                "invalid rfd state `{value}`; expected prediscussion|ideation|discussion|published|committed|abandoned"
            ),
            Self::MissingTitle => write!(f, "rfd title must not be empty"),
            Self::MissingField(field) => write!(f, "required field `{field}` is missing"),
        }
    }
}

impl Error for RfdValidationError {}

/// Canonical RFD record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfd {
    pub id: RfdId,
    pub title: String,
    /// Normalized identifiers: email when known, display name otherwise.
    #[serde(default)]
    pub authors: Vec<String>,
    pub state: RfdState,
    /// Discussion thread URL, may be filled in after creation.
    #[serde(default)]
    pub discussion: String,
    #[serde(default)]
    pub legacy_discussion: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Rendered HTML.
    #[serde(default)]
    pub content: String,
    /// Raw markdown source.
    #[serde(default, rename = "contentMD")]
    pub content_md: String,
    /// Store-assigned.
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    /// Store-assigned, refreshed on every write.
    #[serde(default = "epoch")]
    pub modified_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Rfd {
    /// Creates a document shell with empty content and unset timestamps.
    pub fn new(id: RfdId, title: impl Into<String>, state: RfdState) -> Self {
        Self {
            id,
            title: title.into(),
            authors: Vec::new(),
            state,
            discussion: String::new(),
            legacy_discussion: String::new(),
            tags: Vec::new(),
            content: String::new(),
            content_md: String::new(),
            created_at: epoch(),
            modified_at: epoch(),
        }
    }

    /// Checks ingestion-level invariants.
    ///
    /// Id and state are already guaranteed by their types, so only free-form
    /// fields are checked here.
    pub fn validate(&self) -> Result<(), RfdValidationError> {
        if self.title.trim().is_empty() {
            return Err(RfdValidationError::MissingTitle);
        }
        Ok(())
    }

    /// Permalink of this document below `site_url`.
    pub fn permalink(&self, site_url: &str) -> String {
        format!("{}/rfd/{}", site_url.trim_end_matches('/'), self.id)
    }
}
