//! Session lifecycle for vCenter connections of the vSphere cloud provider.
//!
//! A [`VSphereConnection`] keeps one authenticated session per vCenter and
//! transparently logs in again once vCenter forgets the session. Logins use
//! one of three strategies, see [`LoginStrategy`]:
//!
//! - cloning a session shared by a session manager service,
//! - exchanging a client certificate for a SAML token,
//! - plain username and password.
//!
//! The SOAP client itself is abstracted by [`SessionTransport`]. The
//! [`ConnectionManager`] builds connections from the [`CloudConfig`] and
//! reloads credentials from the referenced Secret whenever vCenter rejects a
//! login.
pub mod certificate;
pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod login;
pub mod round_tripper;
pub mod shared_session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{CloudConfig, CloudConfigOptions};
pub use connection::{ConnectLock, ConnectionOptions, VSphereConnection};
pub use connection_manager::ConnectionManager;
pub use login::{LoginStrategy, SessionCredentials};
pub use transport::{SessionTransport, TransportError, TrustAnchor};
