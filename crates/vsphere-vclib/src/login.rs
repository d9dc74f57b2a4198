use educe::Educe;
use vsphere_credential_manager::Credential;

use crate::certificate::is_pem_encoded;

/// The credential fields a [`VSphereConnection`](crate::connection::VSphereConnection)
/// logs in with.
#[derive(Clone, Default, Educe, PartialEq, Eq)]
#[educe(Debug)]
pub struct SessionCredentials {
    pub username: String,

    #[educe(Debug(ignore))]
    pub password: String,

    pub session_manager_url: String,

    #[educe(Debug(ignore))]
    pub session_manager_token: String,
}

impl SessionCredentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn session_manager(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            session_manager_url: url.into(),
            session_manager_token: token.into(),
            ..Self::default()
        }
    }
}

impl From<Credential> for SessionCredentials {
    fn from(credential: Credential) -> Self {
        Self {
            username: credential.user,
            password: credential.password,
            session_manager_url: credential.vc_session_manager_url,
            session_manager_token: credential.vc_session_manager_token,
        }
    }
}

/// How a fresh client is authenticated.
#[derive(Clone, Copy, Educe, PartialEq, Eq)]
#[educe(Debug)]
pub enum LoginStrategy<'a> {
    /// Adopt the session handed out by the session manager at `url`.
    SharedSession {
        url: &'a str,
        #[educe(Debug(ignore))]
        token: &'a str,
    },

    /// Exchange the PEM-encoded certificate and private key for a SAML token.
    Certificate {
        #[educe(Debug(ignore))]
        certificate: &'a str,
        #[educe(Debug(ignore))]
        private_key: &'a str,
    },

    Password {
        username: &'a str,
        #[educe(Debug(ignore))]
        password: &'a str,
    },
}

impl<'a> LoginStrategy<'a> {
    /// Picks the strategy for `credentials`.
    ///
    /// A configured session manager wins over everything else. Otherwise a
    /// PEM-encoded username selects certificate login, with the password
    /// holding the private key.
    pub fn select(credentials: &'a SessionCredentials) -> Self {
        if !credentials.session_manager_url.is_empty() {
            Self::SharedSession {
                url: &credentials.session_manager_url,
                token: &credentials.session_manager_token,
            }
        } else if is_pem_encoded(&credentials.username) {
            Self::Certificate {
                certificate: &credentials.username,
                private_key: &credentials.password,
            }
        } else {
            Self::Password {
                username: &credentials.username,
                password: &credentials.password,
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SharedSession { .. } => "shared-session",
            Self::Certificate { .. } => "certificate",
            Self::Password { .. } => "password",
        }
    }
}
