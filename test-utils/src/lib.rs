//! Shared test fixtures for buildbox.
//!
//! [`FakeLxc`] is an in-memory LXD daemon implementing [`LxcClient`]. It keeps
//! per-instance filesystems, an image catalog and a call journal, and
//! understands the handful of commands the provisioning flow runs (`cat`,
//! `test`, `mkdir`, `systemctl is-system-running`, `getent`). Everything else
//! succeeds unless told to fail.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use buildbox::executor::{ExecCommand, ExecOutput, ExecProcess, Redirect};
use buildbox::lxd::{
    ImageAlias, ImageEntry, InstanceEntry, InstanceRef, LaunchRequest, LxcClient,
    PublishRequest, PushOptions, RemoteConfig,
};
use buildbox_shared::constants::target_paths;
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use parking_lot::Mutex;

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A file inside a fake instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeFile {
    pub content: Vec<u8>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FakeFile {
    fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            mode: 0o644,
            uid: 0,
            gid: 0,
        }
    }
}

type Filesystem = BTreeMap<PathBuf, FakeFile>;

#[derive(Clone, Debug, Default)]
struct FakeInstance {
    files: Filesystem,
    dirs: BTreeSet<PathBuf>,
    running: bool,
    ephemeral: bool,
    devices: Vec<(String, PathBuf, PathBuf)>,
}

impl FakeInstance {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path) || self.files.keys().any(|p| p.starts_with(path) && p != path)
    }
}

#[derive(Clone, Debug)]
struct FakeImage {
    remote: String,
    project: String,
    alias: String,
    files: Filesystem,
}

type InstanceKey = (String, String, String);

fn key(instance: &InstanceRef) -> InstanceKey {
    (
        instance.remote.clone(),
        instance.project.clone(),
        instance.name.clone(),
    )
}

#[derive(Debug)]
struct FakeState {
    available: bool,
    remotes: HashMap<String, RemoteConfig>,
    projects: BTreeSet<(String, String)>,
    profiles: HashMap<(String, String, String), serde_yaml::Value>,
    images: Vec<FakeImage>,
    base_os_release: HashMap<String, String>,
    instances: BTreeMap<InstanceKey, FakeInstance>,
    stale_image_listing: bool,
    system_state: String,
    network_ready: bool,
    failing_commands: Vec<String>,
    journal: Vec<String>,
    exec_journal: Vec<(InstanceKey, String)>,
    publishes: usize,
}

fn default_profile() -> serde_yaml::Value {
    serde_yaml::from_str(
        "config: {}\ndescription: Default LXD profile\ndevices:\n  eth0:\n    name: eth0\n    network: lxdbr0\n    type: nic\n  root:\n    path: /\n    pool: default\n    type: disk\nname: default\n",
    )
    .unwrap_or(serde_yaml::Value::Null)
}

impl Default for FakeState {
    fn default() -> Self {
        let mut remotes = HashMap::new();
        remotes.insert("local".to_string(), RemoteConfig::new("unix://", "lxd"));

        let mut projects = BTreeSet::new();
        projects.insert(("local".to_string(), "default".to_string()));

        let mut profiles = HashMap::new();
        profiles.insert(
            (
                "local".to_string(),
                "default".to_string(),
                "default".to_string(),
            ),
            default_profile(),
        );

        Self {
            available: true,
            remotes,
            projects,
            profiles,
            images: Vec::new(),
            base_os_release: HashMap::new(),
            instances: BTreeMap::new(),
            stale_image_listing: false,
            system_state: "running".to_string(),
            network_ready: true,
            failing_commands: Vec::new(),
            journal: Vec::new(),
            exec_journal: Vec::new(),
            publishes: 0,
        }
    }
}

fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> BuildboxError {
    BuildboxError::CommandFailed {
        command: command.into(),
        exit_code: 1,
        stderr: stderr.into(),
    }
}

fn output(exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// In-memory LXD daemon.
#[derive(Debug, Default)]
pub struct FakeLxc {
    state: Mutex<FakeState>,
}

impl FakeLxc {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Scenario setup
    // ------------------------------------------------------------------

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn add_remote(&self, name: &str, config: RemoteConfig) {
        self.state.lock().remotes.insert(name.to_string(), config);
    }

    /// What `systemctl is-system-running` prints.
    pub fn set_system_state(&self, state: &str) {
        self.state.lock().system_state = state.to_string();
    }

    /// Whether `getent hosts` resolves.
    pub fn set_network_ready(&self, ready: bool) {
        self.state.lock().network_ready = ready;
    }

    /// Make every exec whose command line starts with `prefix` exit 100.
    pub fn fail_command(&self, prefix: &str) {
        self.state.lock().failing_commands.push(prefix.to_string());
    }

    /// `/etc/os-release` content of instances launched from the remote
    /// image `image`. Defaults to Ubuntu with `VERSION_ID` set to `image`.
    pub fn set_base_os_release(&self, image: &str, content: &str) {
        self.state
            .lock()
            .base_os_release
            .insert(image.to_string(), content.to_string());
    }

    /// Hide the image catalog from listings, as if they were taken before a
    /// concurrent publish landed.
    pub fn set_stale_image_listing(&self, stale: bool) {
        self.state.lock().stale_image_listing = stale;
    }

    /// Register an instance with the given files already in place.
    pub fn add_instance(&self, instance: &InstanceRef, running: bool, files: &[(&str, &str)]) {
        let fake = FakeInstance {
            files: files
                .iter()
                .map(|(path, content)| (PathBuf::from(path), FakeFile::new(*content)))
                .collect(),
            running,
            ..FakeInstance::default()
        };
        self.state.lock().instances.insert(key(instance), fake);
    }

    /// Put an image with the given files into the catalog of `(remote, project)`.
    pub fn add_image(&self, remote: &str, project: &str, alias: &str, files: &[(&str, &str)]) {
        self.state.lock().images.push(FakeImage {
            remote: remote.to_string(),
            project: project.to_string(),
            alias: alias.to_string(),
            files: files
                .iter()
                .map(|(path, content)| (PathBuf::from(path), FakeFile::new(*content)))
                .collect(),
        });
    }

    pub fn write_file(&self, instance: &InstanceRef, path: &str, content: &str) {
        if let Some(fake) = self.state.lock().instances.get_mut(&key(instance)) {
            fake.files.insert(PathBuf::from(path), FakeFile::new(content));
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn instance_exists(&self, instance: &InstanceRef) -> bool {
        self.state.lock().instances.contains_key(&key(instance))
    }

    pub fn instance_running(&self, instance: &InstanceRef) -> bool {
        self.state
            .lock()
            .instances
            .get(&key(instance))
            .is_some_and(|i| i.running)
    }

    pub fn instance_ephemeral(&self, instance: &InstanceRef) -> bool {
        self.state
            .lock()
            .instances
            .get(&key(instance))
            .is_some_and(|i| i.ephemeral)
    }

    pub fn file(&self, instance: &InstanceRef, path: &str) -> Option<FakeFile> {
        self.state
            .lock()
            .instances
            .get(&key(instance))
            .and_then(|i| i.files.get(Path::new(path)).cloned())
    }

    pub fn read_file(&self, instance: &InstanceRef, path: &str) -> Option<String> {
        self.file(instance, path)
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
    }

    /// Aliases in the catalog of `(remote, project)`, ignoring staleness.
    pub fn image_aliases(&self, remote: &str, project: &str) -> Vec<String> {
        self.state
            .lock()
            .images
            .iter()
            .filter(|i| i.remote == remote && i.project == project)
            .map(|i| i.alias.clone())
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.state.lock().publishes
    }

    pub fn has_project(&self, remote: &str, project: &str) -> bool {
        self.state
            .lock()
            .projects
            .contains(&(remote.to_string(), project.to_string()))
    }

    pub fn profile(&self, remote: &str, project: &str, profile: &str) -> Option<serde_yaml::Value> {
        self.state
            .lock()
            .profiles
            .get(&(remote.to_string(), project.to_string(), profile.to_string()))
            .cloned()
    }

    pub fn remotes(&self) -> HashMap<String, RemoteConfig> {
        self.state.lock().remotes.clone()
    }

    pub fn devices(&self, instance: &InstanceRef) -> Vec<(String, PathBuf, PathBuf)> {
        self.state
            .lock()
            .instances
            .get(&key(instance))
            .map(|i| i.devices.clone())
            .unwrap_or_default()
    }

    /// Daemon-level calls, e.g. `launch local:build from ubuntu-buildd:20.04`.
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Command lines executed inside `instance`, oldest first.
    pub fn exec_log(&self, instance: &InstanceRef) -> Vec<String> {
        let wanted = key(instance);
        self.state
            .lock()
            .exec_journal
            .iter()
            .filter(|(k, _)| *k == wanted)
            .map(|(_, c)| c.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn base_files(state: &FakeState, image: &str) -> Filesystem {
        let os_release = state.base_os_release.get(image).cloned().unwrap_or_else(|| {
            format!(
                "NAME=\"Ubuntu\"\nVERSION=\"{image} LTS\"\nID=ubuntu\nVERSION_ID=\"{image}\"\n"
            )
        });
        let mut files = Filesystem::new();
        files.insert(
            PathBuf::from(target_paths::OS_RELEASE),
            FakeFile::new(os_release),
        );
        files
    }

    fn run_in(state: &mut FakeState, k: &InstanceKey, command: &ExecCommand) -> ExecOutput {
        let line = command.to_string();
        if state.failing_commands.iter().any(|p| line.starts_with(p)) {
            return output(100, "", format!("{}: simulated failure", command.program()));
        }

        let argv = command.argv();
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        let system_state = state.system_state.clone();
        let network_ready = state.network_ready;
        let Some(instance) = state.instances.get_mut(k) else {
            return output(1, "", "Instance not found");
        };

        match args.as_slice() {
            ["cat", path] => match instance.files.get(Path::new(path)) {
                Some(file) => output(0, file.content.clone(), ""),
                None => output(1, "", format!("cat: {}: No such file or directory", path)),
            },
            ["test", "-f", path] => output(
                i32::from(!instance.files.contains_key(Path::new(path))),
                "",
                "",
            ),
            ["test", "-d", path] => output(i32::from(!instance.is_dir(Path::new(path))), "", ""),
            ["mkdir", "-p", path] => {
                instance.dirs.insert(PathBuf::from(path));
                output(0, "", "")
            }
            ["systemctl", "is-system-running"] => {
                let code = i32::from(system_state != "running");
                output(code, format!("{}\n", system_state), "")
            }
            ["getent", "hosts", host] => {
                if network_ready {
                    output(0, format!("127.0.0.1 {}\n", host), "")
                } else {
                    output(2, "", "")
                }
            }
            _ => output(0, "", ""),
        }
    }
}

#[async_trait]
impl LxcClient for FakeLxc {
    async fn ensure_available(&self) -> BuildboxResult<()> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(BuildboxError::NotFound("LXD is not available".into()))
        }
    }

    async fn remote_list(&self) -> BuildboxResult<HashMap<String, RemoteConfig>> {
        Ok(self.state.lock().remotes.clone())
    }

    async fn remote_add(&self, name: &str, config: &RemoteConfig) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("remote add {} {}", name, config.addr));
        if state.remotes.contains_key(name) {
            return Err(command_failed(
                format!("lxc remote add {}", name),
                "Remote already exists",
            ));
        }
        state.remotes.insert(name.to_string(), config.clone());
        Ok(())
    }

    async fn project_list(&self, remote: &str) -> BuildboxResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .projects
            .iter()
            .filter(|(r, _)| r == remote)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn project_create(&self, remote: &str, project: &str) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("project create {}:{}", remote, project));
        if !state
            .projects
            .insert((remote.to_string(), project.to_string()))
        {
            return Err(command_failed(
                format!("lxc project create {}", project),
                "Project already exists",
            ));
        }
        Ok(())
    }

    async fn profile_show(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
    ) -> BuildboxResult<serde_yaml::Value> {
        self.state
            .lock()
            .profiles
            .get(&(remote.to_string(), project.to_string(), profile.to_string()))
            .cloned()
            .ok_or_else(|| {
                command_failed(format!("lxc profile show {}", profile), "Profile not found")
            })
    }

    async fn profile_edit(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
        config: &serde_yaml::Value,
    ) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state
            .journal
            .push(format!("profile edit {}:{} --project {}", remote, profile, project));
        state.profiles.insert(
            (remote.to_string(), project.to_string(), profile.to_string()),
            config.clone(),
        );
        Ok(())
    }

    async fn image_list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<ImageEntry>> {
        let state = self.state.lock();
        if state.stale_image_listing {
            return Ok(Vec::new());
        }
        Ok(state
            .images
            .iter()
            .enumerate()
            .filter(|(_, i)| i.remote == remote && i.project == project)
            .map(|(idx, i)| ImageEntry {
                fingerprint: format!("{:064x}", idx + 1),
                aliases: vec![ImageAlias {
                    name: i.alias.clone(),
                    description: String::new(),
                }],
            })
            .collect())
    }

    async fn publish(&self, request: &PublishRequest) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        let k = key(&request.instance);
        state.journal.push(format!(
            "publish {} as {}",
            request.instance.qualified_name(),
            request.alias
        ));

        let Some(instance) = state.instances.get_mut(&k) else {
            return Err(command_failed("lxc publish", "Instance not found"));
        };
        if instance.ephemeral {
            return Err(command_failed(
                "lxc publish",
                "Cannot publish an ephemeral instance",
            ));
        }
        if instance.running && !request.force {
            return Err(command_failed(
                "lxc publish",
                "The instance is currently running, use --force",
            ));
        }
        instance.running = false;
        let files = instance.files.clone();

        // Aliases are unique per catalog; a later publish takes the alias over.
        let (remote, project) = (request.instance.remote.clone(), request.instance.project.clone());
        state
            .images
            .retain(|i| !(i.remote == remote && i.project == project && i.alias == request.alias));
        state.images.push(FakeImage {
            remote,
            project,
            alias: request.alias.clone(),
            files,
        });
        state.publishes += 1;
        Ok(())
    }

    async fn list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<InstanceEntry>> {
        Ok(self
            .state
            .lock()
            .instances
            .iter()
            .filter(|((r, p, _), _)| r == remote && p == project)
            .map(|((_, _, name), i)| InstanceEntry {
                name: name.clone(),
                status: if i.running { "Running" } else { "Stopped" }.to_string(),
                ephemeral: i.ephemeral,
            })
            .collect())
    }

    async fn launch(&self, request: &LaunchRequest) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        let instance = &request.instance;
        state.journal.push(format!(
            "launch {} from {}:{}{}",
            instance.qualified_name(),
            request.image_remote,
            request.image,
            if request.ephemeral { " ephemeral" } else { "" }
        ));

        let k = key(instance);
        if state.instances.contains_key(&k) {
            return Err(command_failed("lxc launch", "Instance already exists"));
        }

        let published = state.images.iter().find(|i| {
            i.remote == request.image_remote
                && i.project == instance.project
                && i.alias == request.image
        });
        let files = match published {
            Some(image) => image.files.clone(),
            None if state.remotes.contains_key(&request.image_remote) => {
                Self::base_files(&state, &request.image)
            }
            None => {
                return Err(command_failed(
                    "lxc launch",
                    format!("Image not found: {}:{}", request.image_remote, request.image),
                ));
            }
        };

        state.instances.insert(
            k,
            FakeInstance {
                files,
                running: true,
                ephemeral: request.ephemeral,
                ..FakeInstance::default()
            },
        );
        Ok(())
    }

    async fn start(&self, instance: &InstanceRef) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("start {}", instance.qualified_name()));
        match state.instances.get_mut(&key(instance)) {
            Some(fake) => {
                fake.running = true;
                Ok(())
            }
            None => Err(command_failed("lxc start", "Instance not found")),
        }
    }

    async fn stop(&self, instance: &InstanceRef) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("stop {}", instance.qualified_name()));
        let k = key(instance);
        let ephemeral = match state.instances.get_mut(&k) {
            Some(fake) => {
                fake.running = false;
                fake.ephemeral
            }
            None => return Err(command_failed("lxc stop", "Instance not found")),
        };
        if ephemeral {
            state.instances.remove(&k);
        }
        Ok(())
    }

    async fn delete(&self, instance: &InstanceRef, force: bool) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("delete {}", instance.qualified_name()));
        let k = key(instance);
        match state.instances.get(&k).map(|fake| fake.running) {
            None => Err(command_failed("lxc delete", "Instance not found")),
            Some(true) if !force => Err(command_failed(
                "lxc delete",
                "The instance is currently running, stop it first or use --force",
            )),
            Some(_) => {
                state.instances.remove(&k);
                Ok(())
            }
        }
    }

    async fn exec(
        &self,
        instance: &InstanceRef,
        command: &ExecCommand,
    ) -> BuildboxResult<ExecOutput> {
        let mut state = self.state.lock();
        let k = key(instance);
        match state.instances.get(&k).map(|fake| fake.running) {
            None => return Err(command_failed("lxc exec", "Instance not found")),
            Some(false) => return Err(command_failed("lxc exec", "Instance is not running")),
            Some(true) => {}
        }
        state.exec_journal.push((k.clone(), command.to_string()));
        let mut output = Self::run_in(&mut state, &k, command);
        // Only captured streams come back to the caller.
        if command.stdout_redirect() != Redirect::Capture {
            output.stdout.clear();
        }
        if command.stderr_redirect() != Redirect::Capture {
            output.stderr.clear();
        }
        Ok(output)
    }

    async fn exec_streaming(
        &self,
        _instance: &InstanceRef,
        command: &ExecCommand,
    ) -> BuildboxResult<ExecProcess> {
        Err(BuildboxError::Unsupported(format!(
            "streaming exec is not simulated ({})",
            command
        )))
    }

    async fn file_push(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        options: &PushOptions,
    ) -> BuildboxResult<()> {
        let mut pushed = Vec::new();
        if options.recursive {
            let base = source.file_name().map(PathBuf::from).unwrap_or_default();
            for entry in walkdir::WalkDir::new(source) {
                let entry = entry.map_err(|e| BuildboxError::Storage(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|e| BuildboxError::Internal(e.to_string()))?;
                let content = std::fs::read(entry.path())
                    .map_err(|e| BuildboxError::Storage(e.to_string()))?;
                pushed.push((destination.join(&base).join(relative), content));
            }
        } else {
            let content = std::fs::read(source).map_err(|e| {
                BuildboxError::Storage(format!("{}: {}", source.display(), e))
            })?;
            pushed.push((destination.to_path_buf(), content));
        }

        let mut state = self.state.lock();
        state.journal.push(format!(
            "file push {} {}{}",
            source.display(),
            instance.qualified_name(),
            destination.display()
        ));
        let Some(fake) = state.instances.get_mut(&key(instance)) else {
            return Err(command_failed("lxc file push", "Instance not found"));
        };
        for (path, content) in pushed {
            fake.files.insert(
                path,
                FakeFile {
                    content,
                    mode: options.mode.unwrap_or(0o644),
                    uid: options.uid.unwrap_or(0),
                    gid: options.gid.unwrap_or(0),
                },
            );
        }
        Ok(())
    }

    async fn file_pull(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        recursive: bool,
    ) -> BuildboxResult<()> {
        let pulled: Vec<(PathBuf, Vec<u8>)> = {
            let mut state = self.state.lock();
            state.journal.push(format!(
                "file pull {}{} {}",
                instance.qualified_name(),
                source.display(),
                destination.display()
            ));
            let Some(fake) = state.instances.get(&key(instance)) else {
                return Err(command_failed("lxc file pull", "Instance not found"));
            };

            if recursive {
                let base = destination.join(source.file_name().map(PathBuf::from).unwrap_or_default());
                fake.files
                    .iter()
                    .filter_map(|(path, file)| {
                        let relative = path.strip_prefix(source).ok()?;
                        if relative.as_os_str().is_empty() {
                            return None;
                        }
                        Some((base.join(relative), file.content.clone()))
                    })
                    .collect()
            } else {
                match fake.files.get(source) {
                    Some(file) => vec![(destination.to_path_buf(), file.content.clone())],
                    None => {
                        return Err(command_failed(
                            "lxc file pull",
                            format!("{}: not found", source.display()),
                        ));
                    }
                }
            }
        };

        for (path, content) in pulled {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BuildboxError::Storage(e.to_string()))?;
            }
            std::fs::write(&path, content).map_err(|e| BuildboxError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn config_device_add_disk(
        &self,
        instance: &InstanceRef,
        device: &str,
        source: &Path,
        destination: &Path,
    ) -> BuildboxResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!(
            "config device add {} {}",
            instance.qualified_name(),
            device
        ));
        match state.instances.get_mut(&key(instance)) {
            Some(fake) => {
                fake.devices.push((
                    device.to_string(),
                    source.to_path_buf(),
                    destination.to_path_buf(),
                ));
                Ok(())
            }
            None => Err(command_failed("lxc config device add", "Instance not found")),
        }
    }
}
