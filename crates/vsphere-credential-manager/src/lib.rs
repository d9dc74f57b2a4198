//! This crate resolves vCenter credentials from a single Kubernetes [`Secret`][1].
//!
//! The Secret is mirrored into memory by a [`kube`] reflector (see
//! [`secret::secret_reflector`]). The [`CredentialManager`] re-parses the
//! mirrored Secret whenever its resource version changes and serves lookups
//! from the last successfully parsed [`CredentialTable`].
//!
//! Two key layouts are understood inside the Secret payload:
//!
//! - The legacy dotted form, e.g. `10.0.0.1.username` and `10.0.0.1.password`,
//!   optionally `<server>.vc-session-manager-url` and
//!   `<server>.vc-session-manager-token`.
//! - The indexed form, e.g. `username_0`, `password_0` and `server_0`, which is
//!   required for IPv6 literals.
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use k8s_openapi::ByteString;
//! use vsphere_credential_manager::parse::parse_secret_data;
//!
//! let data = BTreeMap::from([
//!     ("username_0".to_owned(), ByteString(b"admin".to_vec())),
//!     ("password_0".to_owned(), ByteString(b"secret".to_vec())),
//!     ("server_0".to_owned(), ByteString(b"fd01::1".to_vec())),
//! ]);
//!
//! let table = parse_secret_data(&data).unwrap();
//! assert_eq!(table["fd01::1"].user, "admin");
//! ```
//!
//! [1]: k8s_openapi::api::core::v1::Secret
pub mod cache;
pub mod credential;
pub mod manager;
pub mod parse;
pub mod secret;

pub use credential::{Credential, CredentialTable};
pub use manager::CredentialManager;
pub use secret::{SecretLister, SecretReference};
