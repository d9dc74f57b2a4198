use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use p256::{
    ecdsa::{DerSignature, SigningKey},
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
};
use parking_lot::Mutex;
use rand_core::OsRng;
use snafu::Snafu;
use tokio::sync::Notify;
use url::Url;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{DecodePem, EncodePem},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

use crate::{
    certificate::CertificateKeyPair,
    round_tripper::TemporaryNetworkErrorPolicy,
    shared_session::{self, SharedTokenOptions, SharedTokenSource},
    transport::{SessionTransport, TransportError, TrustAnchor, UserSession},
};

#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum FakeError {
    #[snafu(display("connection reset by peer"))]
    Temporary,

    #[snafu(display("cannot complete login due to an incorrect user name or password"))]
    InvalidLogin,

    #[snafu(display("the object has already been deleted or has not been completely created"))]
    NotFound,

    #[snafu(display("{message}"))]
    Other { message: String },
}

impl TransportError for FakeError {
    fn is_invalid_login(&self) -> bool {
        matches!(self, Self::InvalidLogin)
    }

    fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeClient {
    pub id: u32,
    pub url: Url,
    pub retry_budget: Option<u32>,
}

#[derive(Debug)]
pub struct FakeSigner {
    pub subject: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    NewClient { url: String, user_agent: String, trust_anchor: TrustAnchor },
    Login { username: String },
    IssueToken { subject: String },
    LoginByToken { subject: String },
    CloneSession { token: String },
    UserSession { client: u32 },
    Logout { client: u32 },
}

impl Call {
    /// Whether the call authenticates a client.
    pub fn is_login(&self) -> bool {
        matches!(
            self,
            Self::Login { .. } | Self::LoginByToken { .. } | Self::CloneSession { .. }
        )
    }
}

/// Holds every login until it is released.
#[derive(Debug, Default)]
pub struct LoginGate {
    /// Notified once a login reached the gate.
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Debug, Default)]
struct State {
    next_client: u32,
    sessions: BTreeMap<u32, String>,
    session_query_error: Option<FakeError>,
    users: BTreeMap<String, String>,
    certificate_subjects: BTreeSet<String>,
    clone_tokens: BTreeSet<String>,
    login_gate: Option<Arc<LoginGate>>,
    calls: Vec<Call>,
}

/// An in-memory vCenter which accepts a configurable set of credentials and
/// records every call.
#[derive(Debug, Default)]
pub struct FakeTransport {
    state: Mutex<State>,
}

impl FakeTransport {
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.accept_user(username, password);
        self
    }

    pub fn accept_user(&self, username: &str, password: &str) {
        self.state
            .lock()
            .users
            .insert(username.to_owned(), password.to_owned());
    }

    pub fn reject_user(&self, username: &str) {
        self.state.lock().users.remove(username);
    }

    pub fn accept_certificate(&self, subject: &str) {
        self.state
            .lock()
            .certificate_subjects
            .insert(subject.to_owned());
    }

    pub fn accept_clone_token(&self, token: &str) {
        self.state.lock().clone_tokens.insert(token.to_owned());
    }

    pub fn revoke_clone_token(&self, token: &str) {
        self.state.lock().clone_tokens.remove(token);
    }

    /// Invalidates every session, as vCenter does after the idle timeout.
    pub fn expire_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    pub fn fail_session_queries(&self, error: Option<FakeError>) {
        self.state.lock().session_query_error = error;
    }

    /// Makes every following password login wait at the returned gate.
    pub fn gate_logins(&self) -> Arc<LoginGate> {
        self.state
            .lock()
            .login_gate
            .get_or_insert_with(Arc::default)
            .clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn login_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.is_login())
            .count()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn start_session(&self, client: &FakeClient, user_name: &str) {
        self.state
            .lock()
            .sessions
            .insert(client.id, user_name.to_owned());
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    type Client = FakeClient;
    type Error = FakeError;
    type Signer = FakeSigner;

    async fn new_client(
        &self,
        url: &Url,
        trust_anchor: &TrustAnchor,
        user_agent: &str,
    ) -> Result<FakeClient, FakeError> {
        self.record(Call::NewClient {
            url: url.to_string(),
            user_agent: user_agent.to_owned(),
            trust_anchor: trust_anchor.clone(),
        });

        let mut state = self.state.lock();
        state.next_client += 1;
        Ok(FakeClient {
            id: state.next_client,
            url: url.clone(),
            retry_budget: None,
        })
    }

    async fn login(
        &self,
        client: &FakeClient,
        username: &str,
        password: &str,
    ) -> Result<(), FakeError> {
        self.record(Call::Login {
            username: username.to_owned(),
        });

        let gate = self.state.lock().login_gate.clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let accepted = self.state.lock().users.get(username).map(String::as_str) == Some(password);
        if !accepted {
            return Err(FakeError::InvalidLogin);
        }
        self.start_session(client, username);
        Ok(())
    }

    async fn issue_token(
        &self,
        _client: &FakeClient,
        key_pair: &CertificateKeyPair,
    ) -> Result<FakeSigner, FakeError> {
        let subject = key_pair.subject().to_string();
        self.record(Call::IssueToken {
            subject: subject.clone(),
        });

        if !self.state.lock().certificate_subjects.contains(&subject) {
            return Err(FakeError::InvalidLogin);
        }
        Ok(FakeSigner { subject })
    }

    async fn login_by_token(
        &self,
        client: &FakeClient,
        signer: &FakeSigner,
    ) -> Result<(), FakeError> {
        self.record(Call::LoginByToken {
            subject: signer.subject.clone(),
        });
        self.start_session(client, &signer.subject);
        Ok(())
    }

    async fn clone_session(&self, client: &FakeClient, token: &str) -> Result<(), FakeError> {
        self.record(Call::CloneSession {
            token: token.to_owned(),
        });

        if !self.state.lock().clone_tokens.contains(token) {
            return Err(FakeError::InvalidLogin);
        }
        self.start_session(client, "shared-session");
        Ok(())
    }

    async fn user_session(&self, client: &FakeClient) -> Result<Option<UserSession>, FakeError> {
        self.record(Call::UserSession { client: client.id });

        let state = self.state.lock();
        if let Some(error) = &state.session_query_error {
            return Err(error.clone());
        }
        Ok(state
            .sessions
            .get(&client.id)
            .map(|user_name| UserSession {
                key: format!("session-{}", client.id),
                user_name: user_name.clone(),
            }))
    }

    async fn logout(&self, client: &FakeClient) -> Result<(), FakeError> {
        self.record(Call::Logout { client: client.id });
        self.state.lock().sessions.remove(&client.id);
        Ok(())
    }

    fn with_retry(&self, client: FakeClient, policy: TemporaryNetworkErrorPolicy) -> FakeClient {
        FakeClient {
            retry_budget: Some(policy.remaining()),
            ..client
        }
    }
}

/// A session manager handing out a fixed token and recording requests.
#[derive(Debug, Default)]
pub struct StaticSharedTokens {
    token: Mutex<String>,
    requests: Mutex<Vec<SharedTokenOptions>>,
}

impl StaticSharedTokens {
    pub fn new(token: &str) -> Self {
        Self {
            token: Mutex::new(token.to_owned()),
            requests: Mutex::default(),
        }
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock() = token.to_owned();
    }

    pub fn fetches(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<SharedTokenOptions> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SharedTokenSource for StaticSharedTokens {
    async fn shared_token(
        &self,
        options: &SharedTokenOptions,
    ) -> Result<String, shared_session::Error> {
        self.requests.lock().push(options.clone());

        let token = self.token.lock().clone();
        if token.is_empty() {
            return Err(shared_session::Error::EmptySessionToken {
                url: options.url.clone(),
            });
        }
        Ok(token)
    }
}

/// Generates a self-signed P-256 certificate for `subject` and returns the
/// PEM-encoded certificate and PKCS#8 private key.
pub fn self_signed_certificate(subject: &str) -> (String, String) {
    let signing_key = SigningKey::random(&mut OsRng);

    let spki_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("failed to encode public key");
    let spki = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes())
        .expect("failed to decode public key");

    let certificate = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(42u32),
        Validity::from_now(Duration::from_secs(3600)).expect("failed to create validity"),
        subject.parse::<Name>().expect("invalid subject"),
        spki,
        &signing_key,
    )
    .expect("failed to create certificate builder")
    .build::<DerSignature>()
    .expect("failed to sign certificate");

    let certificate_pem = certificate
        .to_pem(LineEnding::LF)
        .expect("failed to encode certificate");
    let private_key_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("failed to encode private key");

    (certificate_pem, private_key_pem.to_string())
}
