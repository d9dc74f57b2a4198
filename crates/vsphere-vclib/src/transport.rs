//! The seam between the session lifecycle and the vCenter API client.
//!
//! [`SessionTransport`] is implemented by the SOAP client binding of the
//! embedding component. Everything in this crate only talks to vCenter
//! through it.
use async_trait::async_trait;
use url::Url;

use crate::{certificate::CertificateKeyPair, round_tripper::TemporaryNetworkErrorPolicy};

/// The `User-Agent` sent with every request to vCenter.
pub const USER_AGENT: &str = "k8s-cloud-provider-vsphere";

/// How the TLS certificate presented by vCenter is verified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TrustAnchor {
    /// Verify against the platform's root certificates.
    #[default]
    SystemRoots,

    /// Verify against the PEM-encoded CA bundle.
    CaBundle(String),

    /// Accept exactly the certificate with this SHA-1 thumbprint.
    Thumbprint(String),

    /// Skip verification entirely.
    Insecure,
}

/// The session currently attached to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSession {
    pub key: String,
    pub user_name: String,
}

/// Classification of transport failures.
pub trait TransportError: std::error::Error + Send + Sync + 'static {
    /// The vCenter rejected the login (`InvalidLogin` fault).
    fn is_invalid_login(&self) -> bool;

    /// A transient network failure, which is safe to retry.
    fn is_temporary(&self) -> bool;
}

/// Operations the session lifecycle needs from a vCenter client binding.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// A client handle. Handles are never mutated after login, a new handle
    /// is created instead.
    type Client: Send + Sync + 'static;

    /// A SAML token signer issued by the STS.
    type Signer: Send + Sync;

    type Error: TransportError;

    /// Creates an unauthenticated client for the SDK endpoint at `url`.
    async fn new_client(
        &self,
        url: &Url,
        trust_anchor: &TrustAnchor,
        user_agent: &str,
    ) -> Result<Self::Client, Self::Error>;

    async fn login(
        &self,
        client: &Self::Client,
        username: &str,
        password: &str,
    ) -> Result<(), Self::Error>;

    /// Exchanges the certificate for a SAML token at the vCenter STS.
    async fn issue_token(
        &self,
        client: &Self::Client,
        key_pair: &CertificateKeyPair,
    ) -> Result<Self::Signer, Self::Error>;

    async fn login_by_token(
        &self,
        client: &Self::Client,
        signer: &Self::Signer,
    ) -> Result<(), Self::Error>;

    /// Adopts the already authenticated session identified by `token`.
    async fn clone_session(&self, client: &Self::Client, token: &str) -> Result<(), Self::Error>;

    /// Returns the session attached to `client`, [`None`] if it expired or
    /// was never authenticated.
    async fn user_session(&self, client: &Self::Client)
    -> Result<Option<UserSession>, Self::Error>;

    async fn logout(&self, client: &Self::Client) -> Result<(), Self::Error>;

    /// Wraps the round-tripper of `client` so that requests failing with a
    /// temporary network error are retried according to `policy`.
    fn with_retry(&self, client: Self::Client, policy: TemporaryNetworkErrorPolicy)
    -> Self::Client;
}
