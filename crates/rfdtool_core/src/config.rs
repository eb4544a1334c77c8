//! YAML configuration.
//!
//! # Responsibility
//! - Load and validate the process configuration.
//! - Translate config sections into component settings.
//!
//! # Invariants
//! - A `Config` returned by [`Config::load`] or [`Config::from_yaml_str`]
//!   has passed [`Config::validate`].
//! - Keys are snake_case; the camelCase spellings of older config files are
//!   accepted as aliases.

use crate::authoring::git::{CommitIdentity, GitCredentials, GitRemote};
use crate::authoring::AuthoringSettings;
use crate::repo::BackendKind;
use crate::webhook::WebhookSettings;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_yaml::Error),
    MissingField(&'static str),
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::MissingField(field) => write!(f, "config field `{field}` is required"),
            Self::InvalidValue { field, message } => {
                write!(f, "config field `{field}` is invalid: {message}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub name: String,
    /// Permalink base, `{url}/rfd/{id}`.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthorConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_main_branch", alias = "mainBranch")]
    pub main_branch: String,
    #[serde(default = "default_template_file", alias = "templateFile")]
    pub template_file: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default, alias = "privateKeyPath")]
    pub private_key_path: Option<PathBuf>,
    #[serde(default, alias = "personalAccessToken")]
    pub token: Option<String>,
    #[serde(default, alias = "commitAuthor")]
    pub commit_author: CommitAuthorConfig,
    #[serde(default = "default_clone_depth", alias = "cloneDepth")]
    pub clone_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default, alias = "dataPath")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub repo: Option<RepoConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default, alias = "apiSecret")]
    pub api_secret: Option<String>,
}

fn default_folder() -> String {
    "rfd".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_template_file() -> String {
    "prototemplate.md".to_string()
}

fn default_username() -> String {
    "git".to_string()
}

fn default_clone_depth() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Store-only configuration rooted at `data_path`.
    pub fn with_data_path(data_path: impl Into<PathBuf>) -> Self {
        Self {
            site: SiteConfig::default(),
            data_path: data_path.into(),
            backend: BackendKind::default(),
            repo: None,
            webhook: None,
            api_secret: None,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("data_path"));
        }

        if let Some(repo) = &self.repo {
            if repo.url.trim().is_empty() {
                return Err(ConfigError::MissingField("repo.url"));
            }
            if repo.main_branch.trim().is_empty() {
                return Err(ConfigError::MissingField("repo.main_branch"));
            }
            if repo.template_file.trim().is_empty() {
                return Err(ConfigError::MissingField("repo.template_file"));
            }
            if repo.folder.split('/').any(|part| part == "..") {
                return Err(ConfigError::InvalidValue {
                    field: "repo.folder",
                    message: "must stay inside the repository".to_string(),
                });
            }
            if repo.commit_author.name.trim().is_empty() {
                return Err(ConfigError::MissingField("repo.commit_author.name"));
            }
            if !repo.commit_author.email.contains('@') {
                return Err(ConfigError::InvalidValue {
                    field: "repo.commit_author.email",
                    message: format!("`{}` is not an email address", repo.commit_author.email),
                });
            }
        }

        if let Some(webhook) = &self.webhook {
            let url = webhook.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "webhook.url",
                    message: "must be an http(s) URL".to_string(),
                });
            }
            if webhook.timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "webhook.timeout_secs",
                    message: "must be greater than zero".to_string(),
                });
            }
            if self.site.url.trim().is_empty() {
                return Err(ConfigError::MissingField("site.url"));
            }
        }
        Ok(())
    }

    /// Default log directory, `<data_path>/logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    /// Authoring settings, `None` in store-only mode.
    pub fn authoring_settings(&self) -> Option<AuthoringSettings> {
        let repo = self.repo.as_ref()?;
        Some(AuthoringSettings {
            remote: GitRemote {
                url: repo.url.clone(),
                main_branch: repo.main_branch.clone(),
                credentials: GitCredentials {
                    username: repo.username.clone(),
                    private_key_path: repo.private_key_path.clone(),
                    token: repo.token.clone().filter(|token| !token.is_empty()),
                },
                clone_depth: repo.clone_depth,
            },
            folder: repo.folder.clone(),
            template_file: repo.template_file.clone(),
            commit_author: CommitIdentity {
                name: repo.commit_author.name.clone(),
                email: repo.commit_author.email.clone(),
            },
        })
    }

    /// Webhook settings, `None` when no endpoint is configured.
    pub fn webhook_settings(&self) -> Option<WebhookSettings> {
        let webhook = self.webhook.as_ref()?;
        Some(WebhookSettings {
            url: webhook.url.trim().to_string(),
            secret: webhook.secret.clone().filter(|secret| !secret.is_empty()),
            timeout: Duration::from_secs(webhook.timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};
    use crate::repo::BackendKind;
    use std::path::Path;
    use std::time::Duration;

    const FULL: &str = r#"
site:
  name: Acme RFDs
  url: https://rfd.example.com
data_path: /var/lib/rfd
backend: sqlite
repo:
  url: git@github.com:acme/rfd.git
  private_key_path: /etc/rfd/deploy_key
  commit_author:
    name: RFD Bot
    email: rfd@example.com
webhook:
  url: https://hooks.example.com/rfd
  secret: s3cret
api_secret: token
"#;

    #[test]
    fn full_config_applies_defaults() {
        let config = Config::from_yaml_str(FULL).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.log_dir(), Path::new("/var/lib/rfd/logs"));

        let authoring = config.authoring_settings().unwrap();
        assert_eq!(authoring.folder, "rfd");
        assert_eq!(authoring.template_file, "prototemplate.md");
        assert_eq!(authoring.remote.main_branch, "main");
        assert_eq!(authoring.remote.credentials.username, "git");
        assert_eq!(authoring.remote.clone_depth, 1);

        let webhook = config.webhook_settings().unwrap();
        assert_eq!(webhook.timeout, Duration::from_secs(10));
        assert_eq!(webhook.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn store_only_config_needs_just_a_data_path() {
        let config = Config::from_yaml_str("dataPath: ./data\n").unwrap();
        assert_eq!(config.backend, BackendKind::Kv);
        assert!(config.authoring_settings().is_none());
        assert!(config.webhook_settings().is_none());
    }

    #[test]
    fn validation_reports_the_offending_field() {
        assert!(matches!(
            Config::from_yaml_str("backend: kv\n"),
            Err(ConfigError::MissingField("data_path"))
        ));
        assert!(matches!(
            Config::from_yaml_str("data_path: d\nwebhook:\n  url: ftp://x\n"),
            Err(ConfigError::InvalidValue {
                field: "webhook.url",
                ..
            })
        ));
        assert!(matches!(
            Config::from_yaml_str(
                "data_path: d\nrepo:\n  url: x\n  commit_author: {name: Bot, email: nope}\n"
            ),
            Err(ConfigError::InvalidValue {
                field: "repo.commit_author.email",
                ..
            })
        ));
        assert!(matches!(
            Config::from_yaml_str("data_path: d\nbackend: redis\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
