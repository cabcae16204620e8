//! Smart-HTTP remote
//!
//! Talks to a Git server over the v0 smart-HTTP protocol:
//! - `GET info/refs?service=...` for ref discovery
//! - `POST git-upload-pack` to fetch a full pack of the default branch
//! - `POST git-receive-pack` to send a pack and update one ref

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::{self, Advertisement, RECEIVE_PACK, UPLOAD_PACK};
use crate::remote::{ClonedRepo, Credentials, RefUpdate, Remote};
use async_trait::async_trait;
use bytes::Bytes;
use gistsync_core::ObjectId;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

/// Git remote reached over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpRemote {
    url: String,
    http: reqwest::Client,
    user_agent: String,
    branch: Option<String>,
}

impl HttpRemote {
    /// Create a remote for `git_url` (e.g. `https://gist.github.com/<id>.git`)
    pub fn new(git_url: &str, config: &SessionConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            url: git_url.trim_end_matches('/').to_string(),
            http: builder.build()?,
            user_agent: config.user_agent.clone(),
            branch: config.branch.as_deref().map(protocol::branch_ref),
        })
    }

    /// GET info/refs for `service`
    async fn discover(&self, service: &str, credentials: &Credentials) -> Result<Advertisement, TransportError> {
        let url = format!("{}/info/refs?service={}", self.url, service);
        tracing::debug!("Discovering refs at {}", url);

        let resp = self
            .http
            .get(&url)
            .basic_auth(&credentials.username, Some(credentials.password()))
            .send()
            .await?;
        let resp = check_status(&url, resp).await?;

        let expected = format!("application/x-{}-advertisement", service);
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type != expected {
            return Err(TransportError::Protocol(format!(
                "{} is not a smart-HTTP endpoint (content type {:?})",
                self.url, content_type
            )));
        }

        let body = resp.bytes().await?;
        Advertisement::parse(&body, service)
    }

    /// POST a request body to `service`
    async fn rpc(&self, service: &str, body: Vec<u8>, credentials: &Credentials) -> Result<Bytes, TransportError> {
        let url = format!("{}/{}", self.url, service);
        tracing::debug!("POST {} ({} bytes)", url, body.len());

        let resp = self
            .http
            .post(&url)
            .basic_auth(&credentials.username, Some(credentials.password()))
            .header(CONTENT_TYPE, format!("application/x-{}-request", service))
            .header(ACCEPT, format!("application/x-{}-result", service))
            .body(body)
            .send()
            .await?;
        let resp = check_status(&url, resp).await?;
        Ok(resp.bytes().await?)
    }

    fn select_branch(&self, adv: &Advertisement) -> Result<(String, ObjectId), TransportError> {
        if adv.refs.is_empty() && adv.head.is_none() {
            return Err(TransportError::EmptyRepository);
        }
        match &self.branch {
            Some(branch) => adv
                .resolve(branch)
                .map(|id| (branch.clone(), id))
                .ok_or_else(|| TransportError::Protocol(format!("Remote has no branch {}", branch))),
            None => adv
                .default_branch()
                .ok_or(TransportError::EmptyRepository),
        }
    }

    fn agent(&self) -> String {
        format!("agent={}", self.user_agent.replace(char::is_whitespace, "-"))
    }
}

#[async_trait]
impl Remote for HttpRemote {
    fn url(&self) -> &str {
        &self.url
    }

    async fn clone_repo(&self, credentials: &Credentials) -> Result<ClonedRepo, TransportError> {
        let adv = self.discover(UPLOAD_PACK, credentials).await?;
        let (branch, head) = self.select_branch(&adv)?;

        let mut caps = Vec::new();
        if adv.has_capability("side-band-64k") {
            caps.push("side-band-64k".to_string());
        } else if adv.has_capability("side-band") {
            caps.push("side-band".to_string());
        }
        let sideband = !caps.is_empty();
        if adv.has_capability("ofs-delta") {
            caps.push("ofs-delta".to_string());
        }
        if adv.has_capability("agent") {
            caps.push(self.agent());
        }

        tracing::debug!("Fetching {} at {} with [{}]", branch, head, caps.join(" "));
        let body = self
            .rpc(UPLOAD_PACK, protocol::upload_request(head, &caps)?, credentials)
            .await?;
        let pack = protocol::parse_upload_response(&body, sideband)?;
        tracing::debug!("Received pack of {} bytes", pack.len());

        Ok(ClonedRepo { branch, head, pack })
    }

    async fn push(&self, update: &RefUpdate, pack: Bytes, credentials: &Credentials) -> Result<(), TransportError> {
        let adv = self.discover(RECEIVE_PACK, credentials).await?;

        let found = adv.resolve(&update.refname).unwrap_or(ObjectId::ZERO);
        if found != update.old {
            return Err(TransportError::StaleRef {
                refname: update.refname.clone(),
                expected: update.old,
                found,
            });
        }
        if !adv.has_capability("report-status") {
            return Err(TransportError::Protocol("Remote does not support report-status".into()));
        }

        let mut caps = vec!["report-status".to_string()];
        let sideband = adv.has_capability("side-band-64k");
        if sideband {
            caps.push("side-band-64k".to_string());
        }
        if adv.has_capability("agent") {
            caps.push(self.agent());
        }

        tracing::debug!(
            "Updating {} {} -> {} ({} byte pack)",
            update.refname,
            update.old,
            update.new,
            pack.len()
        );
        let body = self
            .rpc(RECEIVE_PACK, protocol::receive_request(update, &caps, &pack)?, credentials)
            .await?;
        protocol::parse_report_status(&body, sideband)?.check(&update.refname)
    }
}

async fn check_status(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized {
            status: status.as_u16(),
        }),
        StatusCode::NOT_FOUND => Err(TransportError::NotFound(url.to_string())),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}
