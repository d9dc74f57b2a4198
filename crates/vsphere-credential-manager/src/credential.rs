use std::collections::BTreeMap;

use educe::Educe;

/// Credential table keyed by the vCenter server exactly as it appears in the
/// Secret (hostname, IPv4 or IPv6 literal).
pub type CredentialTable = BTreeMap<String, Credential>;

/// Authentication material for a single vCenter.
///
/// Either `user` and `password` are set, or `vc_session_manager_url` and
/// `vc_session_manager_token` are set. For certificate based authentication
/// `user` holds the PEM-encoded certificate and `password` the PEM-encoded
/// private key.
#[derive(Clone, Default, Educe, PartialEq, Eq)]
#[educe(Debug)]
pub struct Credential {
    pub user: String,

    #[educe(Debug(ignore))]
    pub password: String,

    pub vc_session_manager_url: String,

    #[educe(Debug(ignore))]
    pub vc_session_manager_token: String,
}

impl Credential {
    /// Whether the credential points at a session manager instead of carrying
    /// a username and password.
    pub fn uses_session_manager(&self) -> bool {
        !self.vc_session_manager_url.is_empty()
    }
}
