//! LXD provider - creates, reuses, caches and tears down instances.

use std::sync::Arc;

use async_trait::async_trait;
use buildbox_shared::constants::lxd;
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tracing::Span;

use super::client::{InstanceRef, LxcClient, PublishRequest, RemoteConfig};
use super::instance::{Lifetime, LxdInstance};
use super::intermediate::IntermediateImageKey;
use crate::images::{Image, Provisioning};
use crate::options::LxdProviderOptions;
use crate::provider::Provider;

/// Provisions build instances on an LXD daemon.
///
/// ## Setup flow
///
/// ```text
/// daemon available -> project -> image remote
///   -> intermediate image (cache hit, or scratch + bootstrap + publish)
///   -> named instance (reuse if compatible, else clean + launch)
/// ```
///
/// Instance names must be unique per caller for one setup/teardown cycle;
/// no lock is held across daemon calls.
pub struct LxdProvider {
    image: Arc<dyn Image>,
    client: Arc<dyn LxcClient>,
    options: LxdProviderOptions,
    instance: Option<LxdInstance>,
    span: Span,
}

impl LxdProvider {
    pub fn new(
        image: Arc<dyn Image>,
        client: Arc<dyn LxcClient>,
        options: LxdProviderOptions,
    ) -> Self {
        let span = tracing::info_span!("lxd_provider", instance = %options.instance_name);
        Self {
            image,
            client,
            options,
            instance: None,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn options(&self) -> &LxdProviderOptions {
        &self.options
    }

    /// Handle produced by the last successful `setup`.
    pub fn instance(&self) -> Option<&LxdInstance> {
        self.instance.as_ref()
    }

    fn instance_handle(&self, name: &str) -> LxdInstance {
        LxdInstance::new(
            InstanceRef::new(name, &self.options.project, &self.options.remote),
            Arc::clone(&self.client),
        )
    }

    /// Create the project if missing, seeding its default profile from the
    /// default project so instances get networking and storage.
    async fn ensure_project(&self) -> BuildboxResult<()> {
        let remote = &self.options.remote;
        let project = &self.options.project;

        let projects = self.client.project_list(remote).await?;
        if projects.iter().any(|p| p == project) {
            return Ok(());
        }

        tracing::info!(parent: &self.span, project = %project, "Creating project");
        self.client.project_create(remote, project).await?;

        let profile = self
            .client
            .profile_show(remote, lxd::DEFAULT_PROJECT, lxd::DEFAULT_PROFILE)
            .await?;
        self.client
            .profile_edit(remote, project, lxd::DEFAULT_PROFILE, &profile)
            .await
    }

    /// Register the image remote, or verify an existing registration.
    async fn ensure_image_remote(&self) -> BuildboxResult<()> {
        let name = &self.options.image_remote_name;
        let wanted = RemoteConfig::new(
            &self.options.image_remote_addr,
            &self.options.image_remote_protocol,
        );

        let remotes = self.client.remote_list().await?;
        match remotes.get(name) {
            Some(existing) if *existing != wanted => Err(BuildboxError::ConfigConflict(format!(
                "Remote configuration does not match for '{}': expected {} ({}), found {} ({})",
                name, wanted.addr, wanted.protocol, existing.addr, existing.protocol
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::info!(parent: &self.span, remote = %name, addr = %wanted.addr, "Adding image remote");
                self.client.remote_add(name, &wanted).await
            }
        }
    }

    /// Bootstrap a target whose compatibility check came back clean, or wait
    /// for an already bootstrapped one to come up.
    async fn complete_provisioning(
        &self,
        instance: &LxdInstance,
        provisioning: Provisioning,
    ) -> BuildboxResult<()> {
        match provisioning {
            Provisioning::Complete => self.image.wait_until_ready(instance).await,
            Provisioning::Pending => self.image.setup(instance).await,
        }
    }

    /// Reuse `name` when compatible, otherwise (re)launch it.
    async fn setup_instance(
        &self,
        name: &str,
        image: &str,
        image_remote: &str,
        lifetime: Lifetime,
    ) -> BuildboxResult<LxdInstance> {
        let mut instance = self.instance_handle(name);

        if instance.exists().await? {
            if !instance.is_running().await? {
                instance.start().await?;
            }

            match self.image.ensure_compatible(&instance).await {
                Ok(provisioning) => {
                    tracing::info!(parent: &self.span, instance = %name, ?provisioning, "Reusing existing instance");
                    self.complete_provisioning(&instance, provisioning).await?;
                    return Ok(instance);
                }
                Err(e) if e.is_compatibility() && self.options.auto_clean => {
                    tracing::warn!(
                        parent: &self.span,
                        instance = %name,
                        reason = %e,
                        "Cleaning incompatible instance"
                    );
                    instance.delete(true).await?;
                }
                Err(e) => return Err(e),
            }
        }

        instance.launch(image, image_remote, lifetime).await?;
        let provisioning = self.image.ensure_compatible(&instance).await?;
        self.complete_provisioning(&instance, provisioning).await?;
        Ok(instance)
    }

    /// Persistent instance to bootstrap and publish from.
    ///
    /// Publishing an ephemeral instance is undefined on the daemon side, so
    /// this path never takes a lifetime from the caller.
    async fn setup_scratch_instance(
        &self,
        key: &IntermediateImageKey,
    ) -> BuildboxResult<LxdInstance> {
        self.setup_instance(
            key.as_str(),
            self.image.name(),
            &self.options.image_remote_name,
            Lifetime::Persistent,
        )
        .await
    }

    /// Resolve the cached bootstrapped image, building it on a miss.
    ///
    /// The catalog check and the publish are not atomic: two providers racing
    /// on a miss both publish, and `--force` lets the later one win.
    async fn ensure_intermediate_image(&self) -> BuildboxResult<IntermediateImageKey> {
        let key = IntermediateImageKey::for_image(&self.options.image_remote_name, &*self.image);

        let images = self
            .client
            .image_list(&self.options.remote, &self.options.project)
            .await?;
        if images.iter().any(|entry| entry.has_alias(key.as_str())) {
            tracing::info!(parent: &self.span, alias = %key, "Using intermediate image");
            return Ok(key);
        }

        tracing::info!(parent: &self.span, alias = %key, "Building intermediate image");
        let scratch = self.setup_scratch_instance(&key).await?;

        self.client
            .publish(&PublishRequest {
                instance: scratch.instance_ref().clone(),
                alias: key.to_string(),
                force: true,
            })
            .await?;

        scratch.delete(true).await?;
        Ok(key)
    }
}

#[async_trait]
impl Provider for LxdProvider {
    type Executor = LxdInstance;

    async fn setup(&mut self) -> BuildboxResult<LxdInstance> {
        self.client.ensure_available().await?;
        self.ensure_project().await?;
        self.ensure_image_remote().await?;

        let lifetime = Lifetime::from_ephemeral(self.options.use_ephemeral_instances);
        let (image, image_remote) = if self.options.use_intermediate_image {
            let key = self.ensure_intermediate_image().await?;
            (key.to_string(), self.options.remote.clone())
        } else {
            (
                self.image.name().to_string(),
                self.options.image_remote_name.clone(),
            )
        };

        let instance = self
            .setup_instance(&self.options.instance_name, &image, &image_remote, lifetime)
            .await?;
        tracing::info!(parent: &self.span, "Instance ready");

        self.instance = Some(instance.clone());
        Ok(instance)
    }

    async fn teardown(&mut self, clean: bool) -> BuildboxResult<()> {
        let Some(instance) = &self.instance else {
            return Ok(());
        };

        if !instance.exists().await? {
            return Ok(());
        }

        if instance.is_running().await? {
            instance.stop().await?;
        }

        // Ephemeral instances are gone once stopped.
        if clean && instance.exists().await? {
            instance.delete(true).await?;
        }
        Ok(())
    }
}
