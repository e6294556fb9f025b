//! Images - OS baselines that bootstrap and validate a target.
//!
//! An image is identified by a `name` (baseline version tag) and a
//! `revision` (bumped whenever the bootstrap changes in a way that makes
//! previously provisioned targets stale). Two images with the same name but
//! different revisions are never interchangeable.
//!
//! ## Compatibility protocol
//!
//! `setup` writes a compatibility stamp as its very last step. On reuse,
//! `ensure_compatible` reads it back:
//!
//! ```text
//! no stamp                      -> Pending  (earlier setup never finished)
//! stamp, other revision         -> Compatibility error
//! stamp, same revision, bad OS  -> Compatibility error
//! stamp, same revision, OS ok   -> Complete
//! ```

mod buildd;
mod os_release;
mod stamp;
mod version;

pub use buildd::{BuilddAlias, BuilddImage, SetupStep};
pub use os_release::OsRelease;
pub use stamp::CompatibilityStamp;
pub use version::OsVersion;

use async_trait::async_trait;
use buildbox_shared::errors::BuildboxResult;

use crate::executor::Executor;

/// Outcome of a successful compatibility check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provisioning {
    /// The target carries this image's stamp; no bootstrap needed.
    Complete,
    /// No stamp yet. Assumed compatible; `setup` still has to run.
    Pending,
}

/// A logical OS baseline.
#[async_trait]
pub trait Image: Send + Sync {
    /// Baseline version tag, e.g. "20.04".
    fn name(&self) -> &str;

    /// Compatibility revision of the bootstrap procedure.
    fn revision(&self) -> &str;

    /// Check whether `executor`'s target can be reused for this image.
    ///
    /// # Errors
    /// [`buildbox_shared::BuildboxError::Compatibility`] when the stamp
    /// revision or the OS identity does not match.
    async fn ensure_compatible(&self, executor: &dyn Executor) -> BuildboxResult<Provisioning>;

    /// Bootstrap the target to this image's baseline. Idempotent.
    ///
    /// Any checked command failure aborts immediately; the compatibility
    /// stamp is only written once everything else succeeded.
    async fn setup(&self, executor: &dyn Executor) -> BuildboxResult<()>;

    /// Wait for a target that needs no bootstrap to become usable, e.g. one
    /// just launched from an already bootstrapped image.
    ///
    /// Readiness budgets running out is logged, not returned.
    async fn wait_until_ready(&self, executor: &dyn Executor) -> BuildboxResult<()>;
}
