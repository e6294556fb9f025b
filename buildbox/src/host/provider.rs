//! Provider for the host variant.

use async_trait::async_trait;
use buildbox_shared::errors::BuildboxResult;
use tracing::Span;

use super::HostExecutor;
use crate::options::HostProviderOptions;
use crate::provider::Provider;

/// Hands out executors that run directly on the host.
///
/// Nothing is provisioned, so teardown has nothing to reclaim.
#[derive(Clone, Debug)]
pub struct HostProvider {
    options: HostProviderOptions,
    span: Span,
}

impl HostProvider {
    pub fn new(options: HostProviderOptions) -> Self {
        Self {
            options,
            span: tracing::info_span!("host_provider"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new(HostProviderOptions::default())
    }
}

#[async_trait]
impl Provider for HostProvider {
    type Executor = HostExecutor;

    async fn setup(&mut self) -> BuildboxResult<HostExecutor> {
        tracing::debug!(
            parent: &self.span,
            sudo_user = ?self.options.sudo_user,
            "Using host executor"
        );
        Ok(HostExecutor::new(self.options.sudo_user.clone()).with_span(self.span.clone()))
    }

    async fn teardown(&mut self, _clean: bool) -> BuildboxResult<()> {
        Ok(())
    }
}
