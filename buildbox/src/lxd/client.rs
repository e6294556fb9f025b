//! LXD backend client contract.
//!
//! Everything the provisioning layer needs from the container daemon goes
//! through [`LxcClient`]. The production implementation is [`super::LxcCli`];
//! tests drive the same flows against an in-memory daemon.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use buildbox_shared::errors::BuildboxResult;
use serde::{Deserialize, Serialize};

use crate::executor::{ExecCommand, ExecOutput, ExecProcess};

/// Identity of one instance on the daemon.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub name: String,
    pub project: String,
    pub remote: String,
}

impl InstanceRef {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            remote: remote.into(),
        }
    }

    /// `remote:name`, the form lxc accepts as an instance argument.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.remote, self.name)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (project {})", self.remote, self.name, self.project)
    }
}

/// Connection parameters of a configured remote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub addr: String,
    #[serde(default)]
    pub protocol: String,
}

impl RemoteConfig {
    pub fn new(addr: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            protocol: protocol.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAlias {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One entry of an image catalog listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub aliases: Vec<ImageAlias>,
}

impl ImageEntry {
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a.name == alias)
    }
}

/// One entry of an instance listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ephemeral: bool,
}

impl InstanceEntry {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// Arguments for `lxc launch`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRequest {
    pub instance: InstanceRef,
    /// Image name or alias on `image_remote`.
    pub image: String,
    pub image_remote: String,
    pub ephemeral: bool,
}

/// Arguments for `lxc publish`.
///
/// The image lands on the instance's own remote and project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRequest {
    pub instance: InstanceRef,
    pub alias: String,
    /// Stop the instance first if it is running.
    pub force: bool,
}

/// Options for `lxc file push`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Directory push. The source directory is placed inside the
    /// destination, keeping its base name.
    pub recursive: bool,
    pub create_dirs: bool,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Contract for the LXD daemon client.
///
/// Every call is a single daemon round trip. Listing calls return fresh data;
/// callers must not assume the state stays unchanged afterwards.
#[async_trait]
pub trait LxcClient: Send + Sync {
    /// Verify the daemon is reachable.
    async fn ensure_available(&self) -> BuildboxResult<()>;

    /// Configured remotes keyed by name.
    async fn remote_list(&self) -> BuildboxResult<HashMap<String, RemoteConfig>>;

    async fn remote_add(&self, name: &str, config: &RemoteConfig) -> BuildboxResult<()>;

    /// Project names on `remote`.
    async fn project_list(&self, remote: &str) -> BuildboxResult<Vec<String>>;

    async fn project_create(&self, remote: &str, project: &str) -> BuildboxResult<()>;

    /// Profile configuration as a YAML document.
    async fn profile_show(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
    ) -> BuildboxResult<serde_yaml::Value>;

    async fn profile_edit(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
        config: &serde_yaml::Value,
    ) -> BuildboxResult<()>;

    /// Image catalog of `(remote, project)`.
    async fn image_list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<ImageEntry>>;

    async fn publish(&self, request: &PublishRequest) -> BuildboxResult<()>;

    /// Instances of `(remote, project)`.
    async fn list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<InstanceEntry>>;

    async fn launch(&self, request: &LaunchRequest) -> BuildboxResult<()>;

    async fn start(&self, instance: &InstanceRef) -> BuildboxResult<()>;

    async fn stop(&self, instance: &InstanceRef) -> BuildboxResult<()>;

    async fn delete(&self, instance: &InstanceRef, force: bool) -> BuildboxResult<()>;

    /// Run a command inside the instance.
    ///
    /// Returns the raw outcome; the command's `check` flag is applied by the
    /// caller.
    async fn exec(&self, instance: &InstanceRef, command: &ExecCommand)
    -> BuildboxResult<ExecOutput>;

    async fn exec_streaming(
        &self,
        instance: &InstanceRef,
        command: &ExecCommand,
    ) -> BuildboxResult<ExecProcess>;

    /// Copy a host path into the instance.
    async fn file_push(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        options: &PushOptions,
    ) -> BuildboxResult<()>;

    /// Copy an instance path onto the host.
    ///
    /// With `recursive`, the source directory is placed inside `destination`
    /// keeping its base name.
    async fn file_pull(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        recursive: bool,
    ) -> BuildboxResult<()>;

    /// Attach a host directory as a disk device.
    async fn config_device_add_disk(
        &self,
        instance: &InstanceRef,
        device: &str,
        source: &Path,
        destination: &Path,
    ) -> BuildboxResult<()>;
}
