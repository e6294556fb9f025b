//! Configuration for buildbox providers.

use std::path::Path;

use buildbox_shared::constants::{host, lxd};
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// LXD Provider Options
// ============================================================================

/// Options for [`crate::LxdProvider`].
///
/// Only `instance_name` is required; everything else defaults to the buildd
/// remote on the local daemon's default project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LxdProviderOptions {
    /// Name of the instance to create or reuse.
    pub instance_name: String,

    /// Delete an incompatible existing instance instead of failing.
    ///
    /// Default: true
    #[serde(default = "default_auto_clean")]
    pub auto_clean: bool,

    /// Address of the remote serving base images.
    #[serde(default = "default_image_remote_addr")]
    pub image_remote_addr: String,

    /// Name under which the image remote is registered with lxc.
    #[serde(default = "default_image_remote_name")]
    pub image_remote_name: String,

    /// Protocol spoken by the image remote.
    #[serde(default = "default_image_remote_protocol")]
    pub image_remote_protocol: String,

    /// LXD project holding the instances and intermediate images.
    #[serde(default = "default_project")]
    pub project: String,

    /// LXD remote on which instances run.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Launch caller-visible instances as ephemeral (deleted on stop).
    ///
    /// Intermediate scratch instances are never ephemeral regardless.
    /// Default: true
    #[serde(default = "default_use_ephemeral_instances")]
    pub use_ephemeral_instances: bool,

    /// Cache a bootstrapped base image and launch instances from it.
    ///
    /// Default: true
    #[serde(default = "default_use_intermediate_image")]
    pub use_intermediate_image: bool,
}

// Default value functions for LxdProviderOptions

fn default_auto_clean() -> bool {
    true
}

fn default_image_remote_addr() -> String {
    lxd::BUILDD_REMOTE_ADDR.to_string()
}

fn default_image_remote_name() -> String {
    lxd::BUILDD_REMOTE_NAME.to_string()
}

fn default_image_remote_protocol() -> String {
    lxd::BUILDD_REMOTE_PROTOCOL.to_string()
}

fn default_project() -> String {
    lxd::DEFAULT_PROJECT.to_string()
}

fn default_remote() -> String {
    lxd::DEFAULT_REMOTE.to_string()
}

fn default_use_ephemeral_instances() -> bool {
    true
}

fn default_use_intermediate_image() -> bool {
    true
}

impl LxdProviderOptions {
    /// Defaults for everything except the instance name.
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            auto_clean: default_auto_clean(),
            image_remote_addr: default_image_remote_addr(),
            image_remote_name: default_image_remote_name(),
            image_remote_protocol: default_image_remote_protocol(),
            project: default_project(),
            remote: default_remote(),
            use_ephemeral_instances: default_use_ephemeral_instances(),
            use_intermediate_image: default_use_intermediate_image(),
        }
    }

    /// Parse options from a YAML document.
    pub fn from_yaml(document: &str) -> BuildboxResult<Self> {
        serde_yaml::from_str(document)
            .map_err(|e| BuildboxError::Parse(format!("Invalid LXD provider options: {}", e)))
    }

    /// Read options from a YAML file.
    pub fn load(path: &Path) -> BuildboxResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| {
            BuildboxError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&document)
    }
}

// ============================================================================
// Host Provider Options
// ============================================================================

/// Options for [`crate::HostProvider`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProviderOptions {
    /// User to run commands as via `sudo -H -u`. `None` runs them directly.
    ///
    /// Default: root
    #[serde(default = "default_sudo_user")]
    pub sudo_user: Option<String>,
}

fn default_sudo_user() -> Option<String> {
    Some(host::DEFAULT_SUDO_USER.to_string())
}

impl Default for HostProviderOptions {
    fn default() -> Self {
        Self {
            sudo_user: default_sudo_user(),
        }
    }
}
