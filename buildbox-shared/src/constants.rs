//! Shared constants
//!
//! Paths inside provisioned targets and backend defaults. The test utilities
//! read the same values so fake backends agree with the core on file layout.

/// Files inside a provisioned target.
pub mod target_paths {
    /// Compatibility stamp written as the last step of image setup.
    pub const CRAFT_IMAGE_CONF: &str = "/etc/craft-image.conf";

    /// OS identification data (KEY=VALUE lines).
    pub const OS_RELEASE: &str = "/etc/os-release";

    pub const HOSTNAME: &str = "/etc/hostname";

    pub const RESOLV_CONF: &str = "/etc/resolv.conf";

    /// resolv.conf managed by systemd-resolved
    pub const SYSTEMD_RESOLV_CONF: &str = "/run/systemd/resolve/resolv.conf";

    /// Static definition for the primary interface, picked up by networkd.
    pub const NETWORKD_ETH0: &str = "/etc/systemd/network/10-eth0.network";
}

/// LXD defaults
pub mod lxd {
    /// lxc binary name, looked up on PATH
    pub const LXC_BINARY: &str = "lxc";

    /// Remote on which instances are created
    pub const DEFAULT_REMOTE: &str = "local";

    pub const DEFAULT_PROJECT: &str = "default";

    pub const DEFAULT_PROFILE: &str = "default";

    /// Remote serving the buildd base images
    pub const BUILDD_REMOTE_NAME: &str = "ubuntu-buildd";

    pub const BUILDD_REMOTE_ADDR: &str = "https://cloud-images.ubuntu.com/buildd/releases";

    pub const BUILDD_REMOTE_PROTOCOL: &str = "simplestreams";
}

/// Buildd image defaults
pub mod buildd {
    pub const DEFAULT_HOSTNAME: &str = "craft-buildd-instance";

    pub const DEFAULT_REVISION: &str = "0";

    /// Expected NAME in os-release
    pub const OS_NAME: &str = "Ubuntu";

    /// Name resolved to decide that networking is up
    pub const NETWORK_PROBE_HOST: &str = "snapcraft.io";

    /// `systemctl is-system-running` states treated as ready
    pub const READY_SYSTEM_STATES: &[&str] = &["running", "degraded"];
}

/// Host executor defaults
pub mod host {
    pub const DEFAULT_SUDO_USER: &str = "root";
}

/// Readiness polling defaults
pub mod polling {
    /// Delay between probe attempts
    pub const DEFAULT_INTERVAL_MS: u64 = 500;

    /// Wall-clock budget for one wait point
    pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
}

/// Environment variables read by buildbox
pub mod envs {
    /// Overrides the lxc binary location
    pub const BUILDBOX_LXC: &str = "BUILDBOX_LXC";

    /// Log filter, same syntax as RUST_LOG
    pub const BUILDBOX_LOG: &str = "BUILDBOX_LOG";
}
