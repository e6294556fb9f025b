//! Buildbox - clean, reusable build environments
//!
//! Provisions short-lived build instances in which a packaging tool compiles
//! software against a reproducible OS baseline.
//!
//! ## Architecture
//!
//! - `executor`: the command/file contract every target implements
//! - `images`: OS baselines that bootstrap a target and validate reuse
//! - `lxd`: LXD instance handle, backend client contract and provider
//! - `host`: runs directly in the host namespace
//! - `provider`: the setup/teardown contract tying the pieces together
//!
//! ```rust,no_run
//! # async fn example() -> buildbox::BuildboxResult<()> {
//! use std::sync::Arc;
//! use buildbox::{BuilddAlias, BuilddImage, LxcCli, LxdProvider, LxdProviderOptions, Provider};
//! use buildbox::executor::{ExecCommand, Executor};
//!
//! let image = Arc::new(BuilddImage::new(BuilddAlias::Focal));
//! let client = Arc::new(LxcCli::new()?);
//! let mut provider = LxdProvider::new(image, client, LxdProviderOptions::new("snap-build"));
//!
//! let instance = provider.setup().await?;
//! instance
//!     .execute_run(&ExecCommand::new("make").arg("install").check(true))
//!     .await?;
//! provider.teardown(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod host;
pub mod images;
pub mod logging;
pub mod lxd;
pub mod options;
pub mod provider;
pub mod util;

pub use buildbox_shared::{BuildboxError, BuildboxResult, constants};
pub use executor::{ExecCommand, ExecOutput, ExecProcess, Executor, FileSpec, Redirect};
pub use host::{HostExecutor, HostProvider};
pub use images::{BuilddAlias, BuilddImage, Image, OsVersion, Provisioning};
pub use lxd::{LxcCli, LxcClient, LxdInstance, LxdProvider};
pub use options::{HostProviderOptions, LxdProviderOptions};
pub use provider::Provider;
pub use util::poll::PollPolicy;
