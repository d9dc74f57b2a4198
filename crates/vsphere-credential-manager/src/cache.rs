use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;

use crate::credential::{Credential, CredentialTable};

/// The last Secret that parsed successfully, together with the credentials
/// derived from it.
///
/// The table is only ever replaced as a whole, never edited per server.
#[derive(Debug, Default)]
pub struct SecretCache {
    secret: Option<Arc<Secret>>,
    virtual_centers: CredentialTable,
}

impl SecretCache {
    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_deref()
    }

    pub fn credential(&self, server: &str) -> Option<&Credential> {
        self.virtual_centers.get(server)
    }

    pub fn credentials(&self) -> &CredentialTable {
        &self.virtual_centers
    }

    /// Whether `secret` is the same object revision as the cached one.
    ///
    /// Objects without a resource version are never considered current, so
    /// they are always re-parsed.
    pub fn is_current(&self, secret: &Secret) -> bool {
        self.secret.as_deref().is_some_and(|cached| {
            cached.metadata.uid == secret.metadata.uid
                && cached.metadata.resource_version.is_some()
                && cached.metadata.resource_version == secret.metadata.resource_version
        })
    }

    pub fn replace(&mut self, secret: Arc<Secret>, virtual_centers: CredentialTable) {
        self.secret = Some(secret);
        self.virtual_centers = virtual_centers;
    }
}
