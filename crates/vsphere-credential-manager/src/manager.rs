use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::{ObjectRef, Store};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};

use crate::{
    cache::SecretCache,
    credential::Credential,
    parse::{ParseError, parse_secret_data},
    secret::{SecretLister, SecretReference},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("credentials not found for server {server:?}"))]
    CredentialsNotFound { server: String },

    #[snafu(display("failed to parse credentials from secret {secret}"))]
    ParseSecret {
        source: ParseError,
        secret: ObjectRef<Secret>,
    },
}

impl Error {
    /// The [`ParseError`] which caused the lookup to fail, if any.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            Self::ParseSecret { source, .. } => Some(source),
            Self::CredentialsNotFound { .. } => None,
        }
    }
}

/// Serves vCenter credentials from the referenced Secret.
///
/// Every lookup first compares the Secret currently known to the lister with
/// the cached one and re-parses it if the revision changed. Refresh and read
/// happen under one lock, so concurrent callers never observe a half-updated
/// table.
///
/// The cache outlives the Secret: if the Secret is deleted, the
/// last successfully parsed credentials keep being served until a new Secret
/// shows up. A Secret which fails to parse leaves the cache untouched, the
/// parse error is returned to the caller though.
#[derive(Debug)]
pub struct CredentialManager<L = Store<Secret>> {
    secret_ref: SecretReference,
    lister: L,
    cache: Mutex<SecretCache>,
}

impl<L> CredentialManager<L>
where
    L: SecretLister,
{
    pub fn new(secret_ref: SecretReference, lister: L) -> Self {
        Self {
            secret_ref,
            lister,
            cache: Mutex::new(SecretCache::default()),
        }
    }

    pub fn secret_ref(&self) -> &SecretReference {
        &self.secret_ref
    }

    /// Returns the credential of `server`.
    ///
    /// `server` has to match the server in the Secret exactly, IPv6 literals
    /// included.
    #[instrument(skip(self), fields(secret = %self.secret_ref))]
    pub fn get_credential(&self, server: &str) -> Result<Credential> {
        let mut cache = self.cache.lock();
        self.refresh(&mut cache)?;

        cache
            .credential(server)
            .cloned()
            .with_context(|| CredentialsNotFoundSnafu { server })
    }

    /// Returns a snapshot of all known credentials after refreshing the cache.
    pub fn credentials(&self) -> Result<BTreeMap<String, Credential>> {
        let mut cache = self.cache.lock();
        self.refresh(&mut cache)?;

        Ok(cache.credentials().clone())
    }

    fn refresh(&self, cache: &mut SecretCache) -> Result<()> {
        let Some(secret) = self.lister.get_secret(&self.secret_ref) else {
            // Keep serving the cached credentials, e.g. while the Secret is
            // re-created during a rolling update.
            warn!(
                secret = %self.secret_ref,
                "credential secret not found, using cached credentials"
            );
            return Ok(());
        };

        if cache.is_current(&secret) {
            debug!(
                resource_version = secret.metadata.resource_version.as_deref(),
                "credential secret unchanged, using cached credentials"
            );
            return Ok(());
        }

        let table = secret
            .data
            .as_ref()
            .map_or_else(
                || parse_secret_data(&BTreeMap::new()),
                parse_secret_data,
            )
            .with_context(|_| ParseSecretSnafu {
                secret: ObjectRef::from(&self.secret_ref),
            })?;

        info!(
            resource_version = secret.metadata.resource_version.as_deref(),
            servers = table.len(),
            "refreshed credentials from secret"
        );
        cache.replace(secret, table);

        Ok(())
    }
}
