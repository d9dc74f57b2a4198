//! One authenticated session per vCenter.
//!
//! A [`VSphereConnection`] does not track whether it is connected. Every
//! [`VSphereConnection::connect`] checks the current session and logs in
//! again if the check fails or reports no session.
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use snafu::{ResultExt, Snafu};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::{
    certificate::{self, CertificateKeyPair},
    login::{LoginStrategy, SessionCredentials},
    round_tripper::TemporaryNetworkErrorPolicy,
    shared_session::{self, SessionManagerClient, SharedTokenOptions, SharedTokenSource},
    transport::{SessionTransport, TransportError, TrustAnchor, USER_AGENT},
};

/// Default port of the vCenter SDK endpoint.
pub const DEFAULT_PORT: u16 = 443;

#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to parse SDK URL for host {host:?}"))]
    ParseUrl {
        source: url::ParseError,
        host: String,
    },

    #[snafu(display("failed to create client for {url}"))]
    CreateClient { source: E, url: Url },

    #[snafu(display("failed to get shared session token from {url:?}"))]
    GetSharedToken {
        source: shared_session::Error,
        url: String,
    },

    #[snafu(display("failed to clone shared session"))]
    CloneSession { source: E },

    #[snafu(display("failed to load certificate key pair"))]
    LoadKeyPair { source: certificate::Error },

    #[snafu(display("failed to issue SAML token"))]
    IssueToken { source: E },

    #[snafu(display("failed to log in with SAML token"))]
    LoginByToken { source: E },

    #[snafu(display("failed to log in as {username:?}"))]
    Login { source: E, username: String },
}

impl<E> Error<E>
where
    E: TransportError,
{
    /// Whether vCenter rejected the credentials.
    pub fn is_invalid_login(&self) -> bool {
        match self {
            Self::CloneSession { source }
            | Self::IssueToken { source }
            | Self::LoginByToken { source }
            | Self::Login { source, .. } => source.is_invalid_login(),
            Self::ParseUrl { .. }
            | Self::CreateClient { .. }
            | Self::GetSharedToken { .. }
            | Self::LoadKeyPair { .. } => false,
        }
    }
}

/// Serializes [`VSphereConnection::connect`] and [`VSphereConnection::logout`]
/// across all connections sharing it.
///
/// Clones share the same lock. Hand one instance to every connection of the
/// process.
#[derive(Clone, Debug, Default)]
pub struct ConnectLock(Arc<Mutex<()>>);

impl ConnectLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Where a vCenter is reached and how its certificate is verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub hostname: String,
    pub port: u16,
    pub trust_anchor: TrustAnchor,

    /// Retries for temporary network errors, [`None`] or zero selects
    /// [`ROUND_TRIPPER_DEFAULT_COUNT`](crate::round_tripper::ROUND_TRIPPER_DEFAULT_COUNT).
    pub round_tripper_count: Option<u32>,
}

impl ConnectionOptions {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            trust_anchor: TrustAnchor::default(),
            round_tripper_count: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_trust_anchor(mut self, trust_anchor: TrustAnchor) -> Self {
        self.trust_anchor = trust_anchor;
        self
    }

    pub fn with_round_tripper_count(mut self, count: u32) -> Self {
        self.round_tripper_count = Some(count);
        self
    }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn host_port(&self) -> String {
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    pub fn sdk_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{}/sdk", self.host_port()))
    }
}

struct CredentialState {
    credentials: SessionCredentials,

    /// The last shared session token which was cloned successfully.
    shared_token: Option<String>,
}

/// A connection to a single vCenter.
pub struct VSphereConnection<T>
where
    T: SessionTransport,
{
    options: ConnectionOptions,
    transport: Arc<T>,
    shared_tokens: Arc<dyn SharedTokenSource>,
    connect_lock: ConnectLock,
    client: ArcSwapOption<T::Client>,

    /// Held for the whole login, so credential updates never interleave
    /// with an ongoing login.
    credentials: Mutex<CredentialState>,
}

impl<T> std::fmt::Debug for VSphereConnection<T>
where
    T: SessionTransport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VSphereConnection")
            .field("options", &self.options)
            .field("connected", &self.client.load().is_some())
            .finish_non_exhaustive()
    }
}

impl<T> VSphereConnection<T>
where
    T: SessionTransport,
{
    pub fn new(
        options: ConnectionOptions,
        credentials: SessionCredentials,
        transport: Arc<T>,
        connect_lock: ConnectLock,
    ) -> Self {
        Self {
            options,
            transport,
            shared_tokens: Arc::new(SessionManagerClient),
            connect_lock,
            client: ArcSwapOption::empty(),
            credentials: Mutex::new(CredentialState {
                credentials,
                shared_token: None,
            }),
        }
    }

    /// Replaces the client used to fetch shared session tokens.
    pub fn with_shared_token_source(mut self, shared_tokens: Arc<dyn SharedTokenSource>) -> Self {
        self.shared_tokens = shared_tokens;
        self
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The authenticated client, [`None`] until the first successful
    /// [`connect`](Self::connect).
    pub fn client(&self) -> Option<Arc<T::Client>> {
        self.client.load_full()
    }

    /// Makes sure the connection holds a client with a valid session.
    ///
    /// An existing client is kept if vCenter still reports a session for it.
    /// Otherwise, including when the session query fails, the client is
    /// dropped and a new one is logged in. If that login fails, the
    /// connection is left without a client.
    #[instrument(skip(self), fields(host = %self.options.host_port()))]
    pub async fn connect(&self) -> Result<(), Error<T::Error>> {
        let _connect_guard = self.connect_lock.acquire().await;

        if let Some(client) = self.client.load_full() {
            match self.transport.user_session(&client).await {
                Ok(Some(session)) => {
                    debug!(user = %session.user_name, "existing session is valid");
                    return Ok(());
                }
                Ok(None) => {
                    warn!("existing session is not valid or not authenticated, creating new client")
                }
                Err(error) => {
                    warn!(%error, "failed to obtain user session, creating new client")
                }
            }
            self.client.store(None);
        }

        match self.new_client().await {
            Ok(client) => {
                self.client.store(Some(Arc::new(client)));
                Ok(())
            }
            Err(error) => {
                error!(%error, "failed to create vCenter client");
                Err(error)
            }
        }
    }

    /// Ends the session of the current client, if any.
    ///
    /// Waits for a running [`connect`](Self::connect) to finish first. Failures
    /// are logged, the client is dropped either way.
    #[instrument(skip(self), fields(host = %self.options.host_port()))]
    pub async fn logout(&self) {
        let _connect_guard = self.connect_lock.acquire().await;

        let Some(client) = self.client.swap(None) else {
            debug!("not connected, nothing to log out");
            return;
        };

        match self.transport.logout(&client).await {
            Ok(()) => info!("logged out of vCenter"),
            Err(error) => error!(%error, "logout failed"),
        }
    }

    /// Replaces the credentials used for the next login.
    ///
    /// The current session is kept. The new credentials take effect once
    /// [`connect`](Self::connect) finds the session invalid.
    pub async fn update_credentials(&self, credentials: SessionCredentials) {
        let mut state = self.credentials.lock().await;

        if state.credentials.session_manager_url != credentials.session_manager_url
            || state.credentials.session_manager_token != credentials.session_manager_token
        {
            state.shared_token = None;
        }
        state.credentials = credentials;
    }

    async fn new_client(&self) -> Result<T::Client, Error<T::Error>> {
        let url = self.options.sdk_url().with_context(|_| ParseUrlSnafu {
            host: self.options.host_port(),
        })?;

        let mut state = self.credentials.lock().await;
        let client = self
            .transport
            .new_client(&url, &self.options.trust_anchor, USER_AGENT)
            .await
            .with_context(|_| CreateClientSnafu { url: url.clone() })?;

        self.login(&client, &mut state).await?;

        let policy = TemporaryNetworkErrorPolicy::from_count(self.options.round_tripper_count);
        Ok(self.transport.with_retry(client, policy))
    }

    async fn login(
        &self,
        client: &T::Client,
        state: &mut CredentialState,
    ) -> Result<(), Error<T::Error>> {
        let CredentialState {
            credentials,
            shared_token,
        } = state;

        let strategy = LoginStrategy::select(credentials);
        match strategy {
            LoginStrategy::SharedSession { url, token } => {
                if let Some(cached) = shared_token.as_deref() {
                    match self.transport.clone_session(client, cached).await {
                        Ok(()) => {
                            debug!("cloned session with cached shared session token");
                            return Ok(());
                        }
                        Err(error) => {
                            debug!(%error, "cached shared session token rejected, requesting new one")
                        }
                    }
                }

                // The session manager is verified against the system roots
                // even if the vCenter itself is not.
                let options = SharedTokenOptions::new(url, token);
                let fresh = self
                    .shared_tokens
                    .shared_token(&options)
                    .await
                    .context(GetSharedTokenSnafu { url })?;
                self.transport
                    .clone_session(client, &fresh)
                    .await
                    .context(CloneSessionSnafu)?;
                *shared_token = Some(fresh);
            }
            LoginStrategy::Certificate {
                certificate,
                private_key,
            } => {
                let key_pair = CertificateKeyPair::from_pem(certificate, private_key)
                    .context(LoadKeyPairSnafu)?;
                debug!(subject = %key_pair.subject(), "logging in with certificate");

                let signer = self
                    .transport
                    .issue_token(client, &key_pair)
                    .await
                    .context(IssueTokenSnafu)?;
                self.transport
                    .login_by_token(client, &signer)
                    .await
                    .context(LoginByTokenSnafu)?;
            }
            LoginStrategy::Password { username, password } => {
                debug!(username, "logging in with username and password");
                self.transport
                    .login(client, username, password)
                    .await
                    .context(LoginSnafu { username })?;
            }
        }

        info!(strategy = strategy.name(), "logged in to vCenter");
        Ok(())
    }
}
