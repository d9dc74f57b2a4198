use std::{fmt::Display, sync::Arc};

use futures::Stream;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client,
    runtime::{
        WatchStreamExt,
        reflector::{self, ObjectRef, Store},
        watcher,
    },
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// [`SecretReference`] identifies the Kubernetes [`Secret`] holding the
/// vCenter credentials.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Namespace of the Secret being referred to.
    pub namespace: String,

    /// Name of the Secret being referred to.
    pub name: String,
}

impl SecretReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

// Use ObjectRef for logging/errors
impl Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ObjectRef::<Secret>::from(self).fmt(f)
    }
}

impl From<&SecretReference> for ObjectRef<Secret> {
    fn from(val: &SecretReference) -> Self {
        ObjectRef::<Secret>::new(&val.name).within(&val.namespace)
    }
}

/// Read access to an eventually consistent view of Secrets, usually backed
/// by a reflector [`Store`].
pub trait SecretLister: Send + Sync {
    /// Returns the current state of the referenced Secret, or [`None`] if it
    /// does not exist (anymore).
    fn get_secret(&self, secret_ref: &SecretReference) -> Option<Arc<Secret>>;
}

impl SecretLister for Store<Secret> {
    fn get_secret(&self, secret_ref: &SecretReference) -> Option<Arc<Secret>> {
        self.get(&ObjectRef::from(secret_ref))
    }
}

impl<L> SecretLister for Arc<L>
where
    L: SecretLister + ?Sized,
{
    fn get_secret(&self, secret_ref: &SecretReference) -> Option<Arc<Secret>> {
        (**self).get_secret(secret_ref)
    }
}

/// Creates a reflector [`Store`] mirroring the referenced Secret.
///
/// The returned stream drives the underlying watch and has to be polled by
/// the caller for the store to stay current, e.g. by spawning
/// `stream.for_each(|_| futures::future::ready(()))` next to the controller.
pub fn secret_reflector(
    client: Client,
    secret_ref: &SecretReference,
) -> (
    Store<Secret>,
    impl Stream<Item = Result<Secret, watcher::Error>> + Send + 'static,
) {
    debug!(secret = %secret_ref, "watching credential secret");

    let api: Api<Secret> = Api::namespaced(client, &secret_ref.namespace);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", secret_ref.name));
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, config)).applied_objects();

    (reader, stream)
}
