//! The vSphere cloud provider configuration file.
//!
//! ```yaml
//! global:
//!   port: 443
//!   secretName: vsphere-credentials
//!   secretNamespace: kube-system
//! vcenter:
//!   prod:
//!     server: 10.0.0.1
//!     datacenters: [dc-1]
//! ```
//!
//! Every field of a `vcenter` entry which is left out inherits the value of
//! `global`.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use clap::Args;
use educe::Educe;
use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use vsphere_credential_manager::SecretReference;

use crate::{
    connection::{ConnectionOptions, DEFAULT_PORT},
    login::SessionCredentials,
    transport::TrustAnchor,
};

pub const DEFAULT_CLOUD_CONFIG_PATH: &str = "/etc/cloud/vsphere.conf";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read cloud config from {path:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse cloud config"))]
    ParseConfig { source: serde_yaml::Error },

    #[snafu(display("no vCenter is configured"))]
    NoVirtualCenter,

    #[snafu(display("vCenter {label:?} has no server"))]
    EmptyServer { label: String },

    #[snafu(display(
        "vCenter {label:?} needs both secretName and secretNamespace to reference a secret"
    ))]
    IncompleteSecretReference { label: String },

    #[snafu(display("vCenters {first:?} and {second:?} both point at server {server:?}"))]
    DuplicateServer {
        server: String,
        first: String,
        second: String,
    },

    #[snafu(display("vCenter {label:?} configures both caFile and thumbprint"))]
    ConflictingTrustAnchors { label: String },

    #[snafu(display("failed to read CA file {path:?} of vCenter {label:?}"))]
    ReadCaFile {
        source: std::io::Error,
        path: PathBuf,
        label: String,
    },
}

/// Settings shared by all vCenters.
#[derive(Clone, Default, Deserialize, Educe, PartialEq, Eq)]
#[educe(Debug)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub port: Option<u16>,
    pub insecure_flag: Option<bool>,
    pub ca_file: Option<PathBuf>,
    pub thumbprint: Option<String>,
    pub secret_name: Option<String>,
    pub secret_namespace: Option<String>,
    pub round_tripper_count: Option<u32>,
    pub user: Option<String>,

    #[educe(Debug(ignore))]
    pub password: Option<String>,
}

#[derive(Clone, Default, Deserialize, Educe, PartialEq, Eq)]
#[educe(Debug)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCenterConfig {
    /// Hostname or IP address, defaults to the label of the entry.
    #[serde(default)]
    pub server: String,

    pub port: Option<u16>,
    pub insecure_flag: Option<bool>,
    pub ca_file: Option<PathBuf>,
    pub thumbprint: Option<String>,
    pub secret_name: Option<String>,
    pub secret_namespace: Option<String>,
    pub round_tripper_count: Option<u32>,
    pub user: Option<String>,

    #[educe(Debug(ignore))]
    pub password: Option<String>,

    #[serde(default)]
    pub datacenters: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub vcenter: BTreeMap<String, VirtualCenterConfig>,
}

/// A vCenter with all inherited settings applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedVirtualCenter {
    pub label: String,
    pub options: ConnectionOptions,

    /// Static credentials from the config file, used until the Secret
    /// provides some.
    pub credentials: SessionCredentials,

    pub secret_ref: Option<SecretReference>,
    pub datacenters: Vec<String>,
}

impl CloudConfig {
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context(ParseConfigSnafu)
    }

    #[instrument(name = "load_cloud_config")]
    pub fn from_file(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).context(ReadConfigFileSnafu { path })?;
        let config = Self::from_yaml(&input)?;
        debug!(virtual_centers = config.vcenter.len(), "loaded cloud config");
        Ok(config)
    }

    /// Validates the configuration and resolves every vCenter entry.
    ///
    /// CA files are read from disk here. Two entries must not point at the
    /// same server.
    pub fn virtual_centers(&self) -> Result<Vec<ResolvedVirtualCenter>> {
        ensure!(!self.vcenter.is_empty(), NoVirtualCenterSnafu);

        let mut labels_by_server = BTreeMap::new();
        let mut resolved = Vec::with_capacity(self.vcenter.len());
        for (label, vcenter) in &self.vcenter {
            let virtual_center = self.resolve(label, vcenter)?;
            if let Some(first) =
                labels_by_server.insert(virtual_center.options.hostname.clone(), label)
            {
                return DuplicateServerSnafu {
                    server: &virtual_center.options.hostname,
                    first,
                    second: label,
                }
                .fail();
            }
            resolved.push(virtual_center);
        }
        Ok(resolved)
    }

    fn resolve(&self, label: &str, vcenter: &VirtualCenterConfig) -> Result<ResolvedVirtualCenter> {
        let global = &self.global;

        let server = if vcenter.server.is_empty() {
            label
        } else {
            &vcenter.server
        };
        ensure!(!server.is_empty(), EmptyServerSnafu { label });

        let secret_ref = match (
            vcenter.secret_name.as_ref().or(global.secret_name.as_ref()),
            vcenter
                .secret_namespace
                .as_ref()
                .or(global.secret_namespace.as_ref()),
        ) {
            (None, None) => None,
            (Some(name), Some(namespace)) if !name.is_empty() && !namespace.is_empty() => {
                Some(SecretReference::new(namespace, name))
            }
            _ => return IncompleteSecretReferenceSnafu { label }.fail(),
        };

        let insecure = vcenter.insecure_flag.or(global.insecure_flag).unwrap_or(false);
        let ca_file = vcenter.ca_file.as_ref().or(global.ca_file.as_ref());
        let thumbprint = vcenter
            .thumbprint
            .as_ref()
            .or(global.thumbprint.as_ref())
            .filter(|thumbprint| !thumbprint.is_empty());

        let trust_anchor = match (insecure, ca_file, thumbprint) {
            (true, ..) => TrustAnchor::Insecure,
            (false, Some(_), Some(_)) => return ConflictingTrustAnchorsSnafu { label }.fail(),
            (false, Some(path), None) => TrustAnchor::CaBundle(
                std::fs::read_to_string(path).context(ReadCaFileSnafu { path, label })?,
            ),
            (false, None, Some(thumbprint)) => TrustAnchor::Thumbprint(thumbprint.clone()),
            (false, None, None) => TrustAnchor::SystemRoots,
        };

        Ok(ResolvedVirtualCenter {
            label: label.to_owned(),
            options: ConnectionOptions {
                hostname: server.to_owned(),
                port: vcenter.port.or(global.port).unwrap_or(DEFAULT_PORT),
                trust_anchor,
                round_tripper_count: vcenter.round_tripper_count.or(global.round_tripper_count),
            },
            credentials: SessionCredentials::password(
                vcenter.user.as_ref().or(global.user.as_ref()).cloned().unwrap_or_default(),
                vcenter
                    .password
                    .as_ref()
                    .or(global.password.as_ref())
                    .cloned()
                    .unwrap_or_default(),
            ),
            secret_ref,
            datacenters: vcenter.datacenters.clone(),
        })
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct CloudConfigOptions {
    /// Path to the vSphere cloud provider configuration file.
    #[arg(
        long,
        env = "CLOUD_CONFIG",
        value_name = "FILE",
        default_value = DEFAULT_CLOUD_CONFIG_PATH
    )]
    pub cloud_config: PathBuf,
}

impl CloudConfigOptions {
    pub fn load(&self) -> Result<CloudConfig> {
        CloudConfig::from_file(&self.cloud_config)
    }
}
