use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::Store;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, instrument, warn};
use vsphere_credential_manager::{CredentialManager, SecretLister, SecretReference, manager};

use crate::{
    config::{self, CloudConfig},
    connection::{self, ConnectLock, ConnectionOptions, VSphereConnection},
    login::SessionCredentials,
    transport::SessionTransport,
};

#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("vCenter {server:?} is not configured"))]
    UnknownVirtualCenter { server: String },

    #[snafu(display("failed to connect to vCenter {server:?}"))]
    Connect {
        source: connection::Error<E>,
        server: String,
    },

    #[snafu(display("failed to refresh credentials of vCenter {server:?}"))]
    RefreshCredentials {
        source: manager::Error,
        server: String,
    },
}

#[derive(Debug)]
struct VirtualCenter<T, L>
where
    T: SessionTransport,
{
    connection: Arc<VSphereConnection<T>>,
    credential_manager: Option<Arc<CredentialManager<L>>>,
}

/// Owns the connections to all configured vCenters, keyed by server.
///
/// All connections share one [`ConnectLock`]. vCenters which reference a
/// Secret get a [`CredentialManager`], one per distinct Secret.
#[derive(Debug)]
pub struct ConnectionManager<T, L = Store<Secret>>
where
    T: SessionTransport,
{
    transport: Arc<T>,
    connect_lock: ConnectLock,
    virtual_centers: BTreeMap<String, VirtualCenter<T, L>>,
}

impl<T, L> ConnectionManager<T, L>
where
    T: SessionTransport,
    L: SecretLister,
{
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            connect_lock: ConnectLock::new(),
            virtual_centers: BTreeMap::new(),
        }
    }

    /// Creates a connection for every vCenter of `config`.
    ///
    /// `lister_for` is called once per distinct Secret referenced by the
    /// config.
    pub fn from_config(
        config: &CloudConfig,
        transport: Arc<T>,
        mut lister_for: impl FnMut(&SecretReference) -> L,
    ) -> Result<Self, config::Error> {
        let mut manager = Self::new(transport);
        let mut credential_managers = BTreeMap::<SecretReference, Arc<CredentialManager<L>>>::new();

        for vcenter in config.virtual_centers()? {
            let credential_manager = vcenter.secret_ref.map(|secret_ref| {
                credential_managers
                    .entry(secret_ref)
                    .or_insert_with_key(|secret_ref| {
                        Arc::new(CredentialManager::new(
                            secret_ref.clone(),
                            lister_for(secret_ref),
                        ))
                    })
                    .clone()
            });

            manager.insert(vcenter.options, vcenter.credentials, credential_manager);
        }

        Ok(manager)
    }

    /// Adds a vCenter, replacing any existing connection to the same server.
    ///
    /// A replaced connection is not logged out.
    pub fn insert(
        &mut self,
        options: ConnectionOptions,
        credentials: SessionCredentials,
        credential_manager: Option<Arc<CredentialManager<L>>>,
    ) -> Arc<VSphereConnection<T>> {
        let server = options.hostname.clone();
        let connection = Arc::new(VSphereConnection::new(
            options,
            credentials,
            self.transport.clone(),
            self.connect_lock.clone(),
        ));

        let replaced = self.virtual_centers.insert(server.clone(), VirtualCenter {
            connection: connection.clone(),
            credential_manager,
        });
        if replaced.is_some() {
            warn!(%server, "replaced existing connection to vCenter");
        }
        connection
    }

    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.virtual_centers.keys().map(String::as_str)
    }

    pub fn connection(&self, server: &str) -> Option<Arc<VSphereConnection<T>>> {
        self.virtual_centers
            .get(server)
            .map(|vcenter| vcenter.connection.clone())
    }

    /// Connects to `server`.
    ///
    /// If vCenter rejects the login and the vCenter has a credential Secret,
    /// the credentials are reloaded from the Secret and the connection is
    /// attempted once more.
    #[instrument(skip(self))]
    pub async fn connect(&self, server: &str) -> Result<Arc<VSphereConnection<T>>, Error<T::Error>> {
        let vcenter = self
            .virtual_centers
            .get(server)
            .context(UnknownVirtualCenterSnafu { server })?;

        let error = match vcenter.connection.connect().await {
            Ok(()) => return Ok(vcenter.connection.clone()),
            Err(error) => error,
        };

        let Some(credential_manager) = vcenter
            .credential_manager
            .as_ref()
            .filter(|_| error.is_invalid_login())
        else {
            return Err(error).context(ConnectSnafu { server });
        };

        warn!(
            %error,
            secret = %credential_manager.secret_ref(),
            "invalid login, refreshing credentials from secret"
        );
        let credential = credential_manager
            .get_credential(server)
            .context(RefreshCredentialsSnafu { server })?;
        vcenter.connection.update_credentials(credential.into()).await;

        vcenter
            .connection
            .connect()
            .await
            .context(ConnectSnafu { server })?;
        info!("connected with refreshed credentials");

        Ok(vcenter.connection.clone())
    }

    /// Logs out of every vCenter.
    pub async fn logout_all(&self) {
        for vcenter in self.virtual_centers.values() {
            vcenter.connection.logout().await;
        }
    }
}
