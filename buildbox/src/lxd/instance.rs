//! Handle to one LXD instance.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tracing::Span;

use super::client::{InstanceEntry, InstanceRef, LaunchRequest, LxcClient, PushOptions};
use crate::executor::{ExecCommand, ExecOutput, ExecProcess, Executor, FileSpec, Redirect};
use crate::util::copy_path;

/// Whether the daemon deletes the instance when it stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    Ephemeral,
    Persistent,
}

impl Lifetime {
    pub fn from_ephemeral(ephemeral: bool) -> Self {
        if ephemeral {
            Lifetime::Ephemeral
        } else {
            Lifetime::Persistent
        }
    }

    pub fn is_ephemeral(self) -> bool {
        self == Lifetime::Ephemeral
    }
}

/// Identity of an instance plus the client used to reach it.
///
/// Holds no cached state: `exists` and `is_running` ask the daemon every
/// time, so callers must re-query right before acting.
#[derive(Clone)]
pub struct LxdInstance {
    instance: InstanceRef,
    client: Arc<dyn LxcClient>,
    lifetime: Lifetime,
    span: Span,
}

impl fmt::Debug for LxdInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LxdInstance")
            .field("instance", &self.instance)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl LxdInstance {
    pub fn new(instance: InstanceRef, client: Arc<dyn LxcClient>) -> Self {
        let span = tracing::info_span!("lxd_instance", name = %instance.name);
        Self {
            instance,
            client,
            lifetime: Lifetime::Persistent,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn project(&self) -> &str {
        &self.instance.project
    }

    pub fn remote(&self) -> &str {
        &self.instance.remote
    }

    pub fn instance_ref(&self) -> &InstanceRef {
        &self.instance
    }

    /// Lifetime this handle launched the instance with.
    ///
    /// Handles attached to pre-existing instances report `Persistent`.
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    async fn state(&self) -> BuildboxResult<Option<InstanceEntry>> {
        let instances = self
            .client
            .list(&self.instance.remote, &self.instance.project)
            .await?;
        Ok(instances.into_iter().find(|i| i.name == self.instance.name))
    }

    pub async fn exists(&self) -> BuildboxResult<bool> {
        Ok(self.state().await?.is_some())
    }

    pub async fn is_running(&self) -> BuildboxResult<bool> {
        Ok(self.state().await?.is_some_and(|i| i.is_running()))
    }

    /// Create and start the instance from `image_remote:image`.
    pub async fn launch(
        &mut self,
        image: &str,
        image_remote: &str,
        lifetime: Lifetime,
    ) -> BuildboxResult<()> {
        tracing::info!(
            parent: &self.span,
            image = %format!("{}:{}", image_remote, image),
            ?lifetime,
            "Launching instance"
        );
        self.client
            .launch(&LaunchRequest {
                instance: self.instance.clone(),
                image: image.to_string(),
                image_remote: image_remote.to_string(),
                ephemeral: lifetime.is_ephemeral(),
            })
            .await?;
        self.lifetime = lifetime;
        Ok(())
    }

    pub async fn start(&self) -> BuildboxResult<()> {
        tracing::info!(parent: &self.span, "Starting instance");
        self.client.start(&self.instance).await
    }

    pub async fn stop(&self) -> BuildboxResult<()> {
        tracing::info!(parent: &self.span, "Stopping instance");
        self.client.stop(&self.instance).await
    }

    pub async fn delete(&self, force: bool) -> BuildboxResult<()> {
        tracing::info!(parent: &self.span, force, "Deleting instance");
        self.client.delete(&self.instance, force).await
    }

    async fn path_kind(&self, path: &Path) -> BuildboxResult<Option<PathKind>> {
        for (flag, kind) in [("-d", PathKind::Directory), ("-f", PathKind::File)] {
            let probe = ExecCommand::new("test")
                .arg(flag)
                .arg(path.display().to_string())
                .stdout(Redirect::Null)
                .stderr(Redirect::Null);
            if self.client.exec(&self.instance, &probe).await?.success() {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    async fn push(&self, source: &Path, destination: &Path, recursive: bool) -> BuildboxResult<()> {
        let options = PushOptions {
            recursive,
            create_dirs: true,
            ..PushOptions::default()
        };
        self.client
            .file_push(&self.instance, source, destination, &options)
            .await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PathKind {
    File,
    Directory,
}

fn storage_err(context: &str, path: &Path, e: std::io::Error) -> BuildboxError {
    BuildboxError::Storage(format!("{} {}: {}", context, path.display(), e))
}

/// Device name for a disk mounted at `destination`.
fn disk_device_name(destination: &Path) -> String {
    let slug = destination
        .to_string_lossy()
        .trim_matches('/')
        .replace('/', "-");
    if slug.is_empty() {
        "disk".to_string()
    } else {
        format!("disk-{}", slug)
    }
}

#[async_trait]
impl Executor for LxdInstance {
    async fn execute_run(&self, command: &ExecCommand) -> BuildboxResult<ExecOutput> {
        tracing::info!(parent: &self.span, command = %command, "Executing");
        self.client
            .exec(&self.instance, command)
            .await?
            .checked(command)
    }

    async fn execute_streaming(&self, command: &ExecCommand) -> BuildboxResult<ExecProcess> {
        tracing::info!(parent: &self.span, command = %command, "Executing (streaming)");
        self.client.exec_streaming(&self.instance, command).await
    }

    async fn create_file(&self, file: &FileSpec) -> BuildboxResult<()> {
        tracing::debug!(
            parent: &self.span,
            destination = %file.destination.display(),
            mode = %file.mode_octal(),
            "Creating file"
        );

        let mut temp = tempfile::NamedTempFile::new()
            .map_err(|e| BuildboxError::Storage(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&file.content)
            .and_then(|_| temp.flush())
            .map_err(|e| storage_err("Failed to write", temp.path(), e))?;

        let options = PushOptions {
            recursive: false,
            create_dirs: true,
            mode: Some(file.mode),
            uid: Some(file.uid),
            gid: Some(file.gid),
        };
        self.client
            .file_push(&self.instance, temp.path(), &file.destination, &options)
            .await
    }

    async fn mount(&self, source: &Path, destination: &Path) -> BuildboxResult<bool> {
        let device = disk_device_name(destination);
        tracing::info!(
            parent: &self.span,
            source = %source.display(),
            destination = %destination.display(),
            device = %device,
            "Mounting host directory"
        );
        self.client
            .config_device_add_disk(&self.instance, &device, source, destination)
            .await?;
        Ok(true)
    }

    /// Copy into the instance, merging directories into `destination`.
    async fn sync_to(&self, source: &Path, destination: &Path) -> BuildboxResult<()> {
        if source.is_file() {
            return self.push(source, destination, false).await;
        }
        if !source.is_dir() {
            return Err(BuildboxError::NotFound(format!(
                "Source {} not found.",
                source.display()
            )));
        }

        self.execute_run(
            &ExecCommand::new("mkdir")
                .arg("-p")
                .arg(destination.display().to_string())
                .check(true),
        )
        .await?;

        // A recursive push lands the source directory inside its target, so
        // push each child to reproduce the tree at `destination` itself.
        let entries = std::fs::read_dir(source)
            .map_err(|e| storage_err("Failed to read", source, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| storage_err("Failed to read", source, e))?;
            let path = entry.path();
            if path.is_dir() {
                self.push(&path, destination, true).await?;
            } else {
                self.push(&path, &destination.join(entry.file_name()), false)
                    .await?;
            }
        }
        Ok(())
    }

    /// Copy out of the instance, merging directories into `destination`.
    async fn sync_from(&self, source: &Path, destination: &Path) -> BuildboxResult<()> {
        match self.path_kind(source).await? {
            Some(PathKind::File) => {
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| storage_err("Failed to create directory", parent, e))?;
                }
                self.client
                    .file_pull(&self.instance, source, destination, false)
                    .await
            }
            Some(PathKind::Directory) => {
                let staging = tempfile::TempDir::new().map_err(|e| {
                    BuildboxError::Storage(format!("Failed to create staging directory: {}", e))
                })?;
                self.client
                    .file_pull(&self.instance, source, staging.path(), true)
                    .await?;

                let name = source.file_name().map(PathBuf::from).unwrap_or_default();
                let pulled = staging.path().join(name);
                let destination = destination.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    let result = copy_path(&pulled, &destination);
                    drop(staging);
                    result
                })
                .await
                .map_err(|e| BuildboxError::Internal(format!("copy task failed: {}", e)))?
            }
            None => Err(BuildboxError::NotFound(format!(
                "Source {} not found.",
                source.display()
            ))),
        }
    }
}
