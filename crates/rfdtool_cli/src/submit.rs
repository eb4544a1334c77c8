//! Where rendered RFDs are sent.
//!
//! A remote server when `RFD_SERVER` and `RFD_TOKEN` are set, the locally
//! configured store otherwise.

use crate::CliError;
use log::info;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use rfdtool_core::{Rfd, RfdService};
use std::time::Duration;

const API_TOKEN_HEADER: &str = "api-token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Created,
    Updated,
    /// Accepted by a remote server, which does not report which.
    Accepted,
}

pub trait Submitter {
    fn submit(&self, rfd: &Rfd) -> Result<Submitted, CliError>;
}

/// Posts RFDs to `{server}/api/v1/rfds/{id}`.
pub struct RemoteSubmitter {
    server: String,
    token: String,
    http: Client,
}

impl RemoteSubmitter {
    pub fn new(server: &str, token: &str) -> Result<Self, CliError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("rfdtool/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    pub fn endpoint(&self, rfd: &Rfd) -> String {
        format!("{}/api/v1/rfds/{}", self.server, rfd.id)
    }
}

impl Submitter for RemoteSubmitter {
    fn submit(&self, rfd: &Rfd) -> Result<Submitted, CliError> {
        let body = serde_json::to_vec(rfd)?;
        let response = self
            .http
            .post(self.endpoint(rfd))
            .header(CONTENT_TYPE, "application/json")
            .header(API_TOKEN_HEADER, &self.token)
            .body(body)
            .send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(CliError::Server {
                status: status.as_u16(),
                body: text.chars().take(512).collect(),
            });
        }

        let returned: Rfd = serde_json::from_str(&text)?;
        info!(
            "event=rfd_submit module=cli status=ok mode=remote id={} state={}",
            returned.id, returned.state
        );
        Ok(Submitted::Accepted)
    }
}

/// Writes RFDs straight into the configured store.
pub struct LocalSubmitter<'a> {
    service: &'a RfdService,
}

impl<'a> LocalSubmitter<'a> {
    pub fn new(service: &'a RfdService) -> Self {
        Self { service }
    }
}

impl Submitter for LocalSubmitter<'_> {
    fn submit(&self, rfd: &Rfd) -> Result<Submitted, CliError> {
        let outcome = self.service.create_or_update_rfd(rfd)?;
        Ok(if outcome.created {
            Submitted::Created
        } else {
            Submitted::Updated
        })
    }
}
