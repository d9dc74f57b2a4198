//! Client for the session manager service, which hands out tokens of an
//! already authenticated vCenter session so that several components can
//! share a single login.
use std::time::Duration;

use async_trait::async_trait;
use educe::Educe;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};

/// Timeout of a single request to the session manager if none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("URL of session manager cannot be empty"))]
    EmptyUrl,

    #[snafu(display("shared session token cannot be empty"))]
    EmptyToken,

    #[snafu(display("failed to build HTTP client"))]
    BuildHttpClient { source: reqwest::Error },

    #[snafu(display("failed to request shared session token from {url:?}"))]
    SendRequest { source: reqwest::Error, url: String },

    #[snafu(display("session manager {url:?} responded with unexpected status {status}"))]
    UnexpectedStatus { url: String, status: StatusCode },

    #[snafu(display("failed to decode response of session manager {url:?}"))]
    DecodeResponse { source: reqwest::Error, url: String },

    #[snafu(display("session manager {url:?} returned an empty session token"))]
    EmptySessionToken { url: String },
}

/// Where and how to request the shared session token.
#[derive(Clone, Educe, PartialEq, Eq)]
#[educe(Debug)]
pub struct SharedTokenOptions {
    pub url: String,

    /// Bearer token authenticating this component at the session manager.
    #[educe(Debug(ignore))]
    pub token: String,

    pub timeout: Duration,

    /// Skip TLS verification of the session manager.
    pub insecure: bool,
}

impl SharedTokenOptions {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            insecure: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SharedTokenResponse {
    token: String,
}

/// Requests the token of the shared vCenter session.
#[instrument(skip(options), fields(url = %options.url))]
pub async fn get_shared_token(options: &SharedTokenOptions) -> Result<String> {
    ensure!(!options.url.is_empty(), EmptyUrlSnafu);
    ensure!(!options.token.is_empty(), EmptyTokenSnafu);

    let client = reqwest::Client::builder()
        .timeout(options.timeout)
        .danger_accept_invalid_certs(options.insecure)
        .build()
        .context(BuildHttpClientSnafu)?;

    let response = client
        .get(&options.url)
        .bearer_auth(&options.token)
        .send()
        .await
        .with_context(|_| SendRequestSnafu { url: &options.url })?;

    let status = response.status();
    ensure!(status == StatusCode::OK, UnexpectedStatusSnafu {
        url: &options.url,
        status
    });

    let body: SharedTokenResponse = response
        .json()
        .await
        .with_context(|_| DecodeResponseSnafu { url: &options.url })?;
    ensure!(!body.token.is_empty(), EmptySessionTokenSnafu {
        url: &options.url
    });

    debug!("received shared session token");
    Ok(body.token)
}

/// Source of shared session tokens used by the connection.
#[async_trait]
pub trait SharedTokenSource: Send + Sync {
    async fn shared_token(&self, options: &SharedTokenOptions) -> Result<String>;
}

/// Requests tokens from the session manager over HTTP.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionManagerClient;

#[async_trait]
impl SharedTokenSource for SessionManagerClient {
    async fn shared_token(&self, options: &SharedTokenOptions) -> Result<String> {
        get_shared_token(options).await
    }
}
