//! Buildd images - minimal Ubuntu build baselines.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use buildbox_shared::constants::{buildd, target_paths};
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tracing::Span;

use super::{CompatibilityStamp, Image, OsRelease, OsVersion, Provisioning};
use crate::executor::{ExecCommand, Executor, FileSpec, Redirect};
use crate::util::poll::{PollPolicy, poll_until};

const NETWORKD_ETH0: &str = "\
[Match]
Name=eth0

[Network]
DHCP=ipv4
LinkLocalAddressing=ipv6

[DHCP]
RouteMetric=100
UseMTU=true
";

/// Supported buildd releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuilddAlias {
    Xenial,
    Bionic,
    Focal,
}

impl BuilddAlias {
    /// All aliases, oldest first.
    pub const ALL: [BuilddAlias; 3] = [BuilddAlias::Xenial, BuilddAlias::Bionic, BuilddAlias::Focal];

    pub fn version(self) -> OsVersion {
        match self {
            BuilddAlias::Xenial => OsVersion::new(16, 4),
            BuilddAlias::Bionic => OsVersion::new(18, 4),
            BuilddAlias::Focal => OsVersion::new(20, 4),
        }
    }

    /// Canonical version string, which is also the remote image name.
    pub fn as_str(self) -> &'static str {
        match self {
            BuilddAlias::Xenial => "16.04",
            BuilddAlias::Bionic => "18.04",
            BuilddAlias::Focal => "20.04",
        }
    }

    pub fn codename(self) -> &'static str {
        match self {
            BuilddAlias::Xenial => "xenial",
            BuilddAlias::Bionic => "bionic",
            BuilddAlias::Focal => "focal",
        }
    }
}

impl fmt::Display for BuilddAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuilddAlias {
    type Err = BuildboxError;

    /// Accepts a codename ("focal") or a version ("20.04").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        BuilddAlias::ALL
            .into_iter()
            .find(|alias| alias.codename().eq_ignore_ascii_case(s) || alias.as_str() == s)
            .ok_or_else(|| BuildboxError::Parse(format!("Unknown buildd alias '{}'", s)))
    }
}

/// One step of the buildd bootstrap, in execution order.
#[derive(Clone, Debug)]
pub enum SetupStep {
    /// Poll until systemd reports `running` or `degraded`.
    WaitForSystemReady,
    WriteFile(FileSpec),
    Run(ExecCommand),
    /// Poll until the probe host resolves.
    WaitForNetwork,
    /// Write the compatibility stamp. Always last.
    WriteStamp,
}

/// Buildd image configurator.
///
/// Brings a buildd instance to the minimum baseline: hostname, networking
/// (ip & dns), apt cache and snapd.
#[derive(Clone, Debug)]
pub struct BuilddImage {
    alias: BuilddAlias,
    hostname: String,
    revision: String,
    system_ready: PollPolicy,
    network_ready: PollPolicy,
    span: Span,
}

impl BuilddImage {
    pub fn new(alias: BuilddAlias) -> Self {
        Self {
            alias,
            hostname: buildd::DEFAULT_HOSTNAME.to_string(),
            revision: buildd::DEFAULT_REVISION.to_string(),
            system_ready: PollPolicy::default(),
            network_ready: PollPolicy::default(),
            span: tracing::info_span!("buildd_image", alias = %alias),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Polling budget for both readiness waits.
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.system_ready = policy;
        self.network_ready = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn alias(&self) -> BuilddAlias {
        self.alias
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The ordered bootstrap sequence.
    ///
    /// The system-ready wait precedes every service command, otherwise
    /// they race the target's own boot. The network wait precedes the apt
    /// steps. The stamp is last so a partial failure never looks compatible.
    pub fn setup_steps(&self) -> Vec<SetupStep> {
        let run = |argv: &[&str]| {
            SetupStep::Run(
                ExecCommand::new(argv[0])
                    .args(argv[1..].iter().copied())
                    .check(true),
            )
        };
        let apt_install = |packages: &[&str]| {
            SetupStep::Run(
                ExecCommand::new("apt-get")
                    .arg("install")
                    .args(packages.iter().copied())
                    .arg("--yes")
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .check(true),
            )
        };

        vec![
            SetupStep::WaitForSystemReady,
            // hostname
            SetupStep::WriteFile(FileSpec::new(
                target_paths::HOSTNAME,
                self.hostname.as_bytes().to_vec(),
            )),
            // systemd-resolved
            run(&[
                "ln",
                "-sf",
                target_paths::SYSTEMD_RESOLV_CONF,
                target_paths::RESOLV_CONF,
            ]),
            run(&["systemctl", "enable", "systemd-resolved"]),
            run(&["systemctl", "restart", "systemd-resolved"]),
            // systemd-networkd
            SetupStep::WriteFile(FileSpec::new(
                target_paths::NETWORKD_ETH0,
                NETWORKD_ETH0.as_bytes().to_vec(),
            )),
            run(&["systemctl", "enable", "systemd-networkd"]),
            run(&["systemctl", "restart", "systemd-networkd"]),
            SetupStep::WaitForNetwork,
            // apt
            run(&["apt-get", "update"]),
            // snapd and its kernel-level dependencies
            apt_install(&["fuse", "udev"]),
            run(&["systemctl", "enable", "systemd-udevd"]),
            run(&["systemctl", "start", "systemd-udevd"]),
            apt_install(&["snapd"]),
            run(&["systemctl", "start", "snapd.socket"]),
            run(&["systemctl", "start", "snapd.service"]),
            run(&["snap", "wait", "system", "seed.loaded"]),
            SetupStep::WriteStamp,
        ]
    }

    async fn read_stamp(
        &self,
        executor: &dyn Executor,
    ) -> BuildboxResult<Option<CompatibilityStamp>> {
        let command = ExecCommand::new("cat")
            .arg(target_paths::CRAFT_IMAGE_CONF)
            .check(true);

        let output = match executor.execute_run(&command).await {
            Ok(output) => output,
            Err(BuildboxError::CommandFailed { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        CompatibilityStamp::from_yaml(&output.stdout_str())
            .map(Some)
            .map_err(|e| BuildboxError::Compatibility(format!("Unreadable image config: {}", e)))
    }

    async fn write_stamp(&self, executor: &dyn Executor) -> BuildboxResult<()> {
        let content = CompatibilityStamp::new(self.revision.clone()).to_yaml()?;
        executor
            .create_file(&FileSpec::new(
                target_paths::CRAFT_IMAGE_CONF,
                content.into_bytes(),
            ))
            .await
    }

    async fn read_os_release(&self, executor: &dyn Executor) -> BuildboxResult<Option<OsRelease>> {
        let command = ExecCommand::new("cat").arg(target_paths::OS_RELEASE);
        let output = executor.execute_run(&command).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(OsRelease::parse(&output.stdout_str())))
    }

    fn ensure_revision_compatible(&self, stamp: &CompatibilityStamp) -> BuildboxResult<()> {
        if stamp.revision.as_deref() != Some(self.revision.as_str()) {
            return Err(BuildboxError::Compatibility(format!(
                "Expected image revision '{}', found '{}'",
                self.revision,
                stamp.revision.as_deref().unwrap_or("None")
            )));
        }
        Ok(())
    }

    async fn ensure_os_compatible(&self, executor: &dyn Executor) -> BuildboxResult<()> {
        let os_release = self.read_os_release(executor).await?.ok_or_else(|| {
            BuildboxError::Compatibility(format!("{} not found", target_paths::OS_RELEASE))
        })?;

        let os_name = os_release.name();
        if os_name != Some(buildd::OS_NAME) {
            return Err(BuildboxError::Compatibility(format!(
                "Expected OS '{}', found '{}'",
                buildd::OS_NAME,
                os_name.unwrap_or("None")
            )));
        }

        let version_id = os_release.version_id();
        let version = version_id.and_then(|v| v.parse::<OsVersion>().ok());
        if version != Some(self.alias.version()) {
            return Err(BuildboxError::Compatibility(format!(
                "Expected OS version '{}', found '{}'",
                self.alias,
                version_id.unwrap_or("None")
            )));
        }
        Ok(())
    }

    async fn wait_for_system_ready(&self, executor: &dyn Executor) {
        tracing::info!(parent: &self.span, "Waiting for container to be ready...");
        let probe = ExecCommand::new("systemctl")
            .arg("is-system-running")
            .stderr(Redirect::Null);

        let probe = &probe;
        let ready = poll_until(&self.system_ready, move |_| {
            async move {
                match executor.execute_run(probe).await {
                    Ok(output) => {
                        let state = output.stdout_str();
                        let state = state.trim();
                        let ready = buildd::READY_SYSTEM_STATES.contains(&state);
                        if !ready {
                            tracing::debug!(parent: &self.span, state, "systemctl is-system-running");
                        }
                        ready
                    }
                    Err(e) => {
                        tracing::debug!(parent: &self.span, error = %e, "System readiness probe failed");
                        false
                    }
                }
            }
        })
        .await;

        if !ready {
            tracing::warn!(parent: &self.span, "Systemd failed to reach target before timeout.");
        }
    }

    async fn wait_for_network(&self, executor: &dyn Executor) {
        tracing::info!(parent: &self.span, "Waiting for networking to be ready...");
        let probe = ExecCommand::new("getent")
            .args(["hosts", buildd::NETWORK_PROBE_HOST])
            .stdout(Redirect::Null)
            .stderr(Redirect::Null);

        let probe = &probe;
        let ready = poll_until(&self.network_ready, move |_| {
            async move {
                executor
                    .execute_run(probe)
                    .await
                    .map(|output| output.success())
                    .unwrap_or(false)
            }
        })
        .await;

        if !ready {
            tracing::warn!(parent: &self.span, "Failed to setup networking.");
        }
    }
}

#[async_trait]
impl Image for BuilddImage {
    fn name(&self) -> &str {
        self.alias.as_str()
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    async fn ensure_compatible(&self, executor: &dyn Executor) -> BuildboxResult<Provisioning> {
        let Some(stamp) = self.read_stamp(executor).await? else {
            tracing::debug!(parent: &self.span, "No image config found, assuming unfinished setup");
            return Ok(Provisioning::Pending);
        };

        self.ensure_revision_compatible(&stamp)?;
        self.ensure_os_compatible(executor).await?;
        Ok(Provisioning::Complete)
    }

    async fn setup(&self, executor: &dyn Executor) -> BuildboxResult<()> {
        tracing::info!(parent: &self.span, revision = %self.revision, "Setting up buildd image");

        for step in self.setup_steps() {
            match step {
                SetupStep::WaitForSystemReady => self.wait_for_system_ready(executor).await,
                SetupStep::WriteFile(file) => executor.create_file(&file).await?,
                SetupStep::Run(command) => {
                    executor.execute_run(&command).await?;
                }
                SetupStep::WaitForNetwork => self.wait_for_network(executor).await,
                SetupStep::WriteStamp => self.write_stamp(executor).await?,
            }
        }

        tracing::info!(parent: &self.span, "Buildd image setup complete");
        Ok(())
    }

    async fn wait_until_ready(&self, executor: &dyn Executor) -> BuildboxResult<()> {
        self.wait_for_system_ready(executor).await;
        self.wait_for_network(executor).await;
        Ok(())
    }
}
