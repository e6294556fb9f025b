//! Provider trait - produces a ready executor and reclaims it afterwards.

use async_trait::async_trait;
use buildbox_shared::errors::BuildboxResult;

use crate::executor::Executor;

/// Orchestrates one target's setup/teardown cycle.
///
/// `setup` and `teardown` are sequential call chains with no internal
/// parallelism. Instance names must be unique per caller for the duration of
/// a cycle: two providers racing on the same name are not arbitrated here.
#[async_trait]
pub trait Provider: Send {
    type Executor: Executor;

    /// Produce a ready-to-use executor, provisioning it if needed.
    async fn setup(&mut self) -> BuildboxResult<Self::Executor>;

    /// Release the target. `clean` additionally deletes it.
    ///
    /// Idempotent: safe to call repeatedly or after external deletion.
    async fn teardown(&mut self, clean: bool) -> BuildboxResult<()>;
}
