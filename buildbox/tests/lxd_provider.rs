//! Integration tests for the LXD provider against an in-memory daemon.

use std::path::Path;
use std::sync::Arc;

use buildbox::constants::target_paths;
use buildbox::executor::{Executor, FileSpec};
use buildbox::images::{BuilddAlias, BuilddImage, CompatibilityStamp};
use buildbox::lxd::{InstanceRef, IntermediateImageKey, Lifetime, LxdProvider, RemoteConfig};
use buildbox::{BuildboxError, LxdProviderOptions, Provider};
use buildbox_test_utils::{FakeLxc, init_test_tracing};
use rstest::rstest;
use tempfile::TempDir;

const BUILDD_ADDR: &str = "https://cloud-images.ubuntu.com/buildd/releases";
const INTERMEDIATE: &str = "ubuntu-buildd-20-04-r0";
const FOCAL_OS_RELEASE: &str = "NAME=\"Ubuntu\"\nVERSION_ID=\"20.04\"\n";

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    fake: Arc<FakeLxc>,
    image: Arc<BuilddImage>,
}

impl TestContext {
    fn new() -> Self {
        init_test_tracing();
        Self {
            fake: Arc::new(FakeLxc::new()),
            image: Arc::new(BuilddImage::new(BuilddAlias::Focal)),
        }
    }

    fn provider(&self, options: LxdProviderOptions) -> LxdProvider {
        LxdProvider::new(self.image.clone(), self.fake.clone(), options)
    }

    /// Provider launching straight from the remote image.
    fn direct_provider(&self, name: &str) -> LxdProvider {
        let mut options = LxdProviderOptions::new(name);
        options.use_intermediate_image = false;
        self.provider(options)
    }

    fn stamp_revision(&self, instance: &InstanceRef) -> Option<String> {
        let stamp = self
            .fake
            .read_file(instance, target_paths::CRAFT_IMAGE_CONF)?;
        CompatibilityStamp::from_yaml(&stamp).ok()?.revision
    }
}

fn local(name: &str) -> InstanceRef {
    InstanceRef::new(name, "default", "local")
}

// ============================================================================
// INTERMEDIATE IMAGE TESTS
// ============================================================================

#[tokio::test]
async fn fresh_setup_builds_intermediate_image_then_launches_from_it() {
    let ctx = TestContext::new();
    let mut provider = ctx.provider(LxdProviderOptions::new("snap-build"));

    let instance = provider.setup().await.unwrap();

    assert_eq!(instance.name(), "snap-build");
    assert_eq!(instance.lifetime(), Lifetime::Ephemeral);
    assert_eq!(
        ctx.fake.image_aliases("local", "default"),
        vec![INTERMEDIATE.to_string()]
    );
    // Scratch instance is gone once published.
    assert!(!ctx.fake.instance_exists(&local(INTERMEDIATE)));

    let journal = ctx.fake.journal();
    assert!(journal.contains(&format!(
        "launch local:{} from ubuntu-buildd:20.04",
        INTERMEDIATE
    )));
    assert!(journal.contains(&format!(
        "launch local:snap-build from local:{} ephemeral",
        INTERMEDIATE
    )));

    // The published image already carries the stamp: no second bootstrap.
    let target = local("snap-build");
    assert!(ctx.fake.instance_running(&target));
    assert!(ctx.fake.instance_ephemeral(&target));
    assert_eq!(ctx.stamp_revision(&target).as_deref(), Some("0"));
    let log = ctx.fake.exec_log(&target);
    assert!(!log.iter().any(|c| c == "apt-get update"));
    // It still has to come up before being handed out.
    assert!(log.contains(&"systemctl is-system-running".to_string()));
    assert!(log.contains(&"getent hosts snapcraft.io".to_string()));
}

#[tokio::test]
async fn scratch_instance_is_never_ephemeral() {
    let ctx = TestContext::new();
    let mut options = LxdProviderOptions::new("snap-build");
    options.use_ephemeral_instances = true;
    let mut provider = ctx.provider(options);

    provider.setup().await.unwrap();

    let scratch_launch = ctx
        .fake
        .journal()
        .into_iter()
        .find(|c| c.starts_with(&format!("launch local:{}", INTERMEDIATE)))
        .unwrap();
    assert!(!scratch_launch.ends_with("ephemeral"));
}

#[tokio::test]
async fn cached_intermediate_image_skips_bootstrap() {
    let ctx = TestContext::new();
    ctx.fake.add_image(
        "local",
        "default",
        INTERMEDIATE,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '0'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    let mut provider = ctx.provider(LxdProviderOptions::new("snap-build"));

    provider.setup().await.unwrap();

    assert_eq!(ctx.fake.publish_count(), 0);
    assert_eq!(
        ctx.fake
            .count_calls(&format!("launch local:{}", INTERMEDIATE)),
        0
    );
    assert!(
        !ctx.fake
            .exec_log(&local("snap-build"))
            .iter()
            .any(|c| c.starts_with("apt-get"))
    );
}

#[tokio::test(start_paused = true)]
async fn instance_from_cached_image_waits_for_system_ready() {
    let ctx = TestContext::new();
    ctx.fake.add_image(
        "local",
        "default",
        INTERMEDIATE,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '0'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    ctx.fake.set_system_state("starting");
    let mut provider = ctx.provider(LxdProviderOptions::new("snap-build"));

    provider.setup().await.unwrap();

    let probes = ctx
        .fake
        .exec_log(&local("snap-build"))
        .iter()
        .filter(|c| *c == "systemctl is-system-running")
        .count();
    // Default budget: 60s at 500ms.
    assert_eq!(probes, 120);
}

#[tokio::test]
async fn intermediate_key_follows_image_revision() {
    let ctx = TestContext::new();
    let image = Arc::new(BuilddImage::new(BuilddAlias::Bionic).with_revision("4"));
    let mut provider = LxdProvider::new(
        image.clone(),
        ctx.fake.clone(),
        LxdProviderOptions::new("snap-build"),
    );

    provider.setup().await.unwrap();

    let key = IntermediateImageKey::new("ubuntu-buildd", "18.04", "4");
    assert_eq!(key.as_str(), "ubuntu-buildd-18-04-r4");
    assert_eq!(
        ctx.fake.image_aliases("local", "default"),
        vec![key.to_string()]
    );
}

#[tokio::test]
async fn stale_catalog_listing_rebuilds_and_republishes() {
    let ctx = TestContext::new();
    let mut first = ctx.provider(LxdProviderOptions::new("first"));
    first.setup().await.unwrap();

    // A listing taken before the first publish landed still reports a miss.
    ctx.fake.set_stale_image_listing(true);
    let mut second = ctx.provider(LxdProviderOptions::new("second"));
    second.setup().await.unwrap();

    assert_eq!(ctx.fake.publish_count(), 2);
    assert_eq!(
        ctx.fake.image_aliases("local", "default"),
        vec![INTERMEDIATE.to_string()]
    );
    assert!(ctx.fake.instance_exists(&local("second")));
}

#[tokio::test]
async fn direct_launch_bootstraps_named_instance() {
    let ctx = TestContext::new();
    let mut provider = ctx.direct_provider("snap-build");

    provider.setup().await.unwrap();

    let target = local("snap-build");
    assert_eq!(ctx.fake.publish_count(), 0);
    assert!(
        ctx.fake
            .journal()
            .contains(&"launch local:snap-build from ubuntu-buildd:20.04 ephemeral".to_string())
    );
    assert!(
        ctx.fake
            .exec_log(&target)
            .contains(&"apt-get update".to_string())
    );
    assert_eq!(ctx.stamp_revision(&target).as_deref(), Some("0"));
}

// ============================================================================
// INSTANCE REUSE TESTS
// ============================================================================

#[tokio::test]
async fn compatible_instance_is_reused() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    ctx.fake.add_instance(
        &target,
        true,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '0'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    let mut provider = ctx.direct_provider("snap-build");

    provider.setup().await.unwrap();

    assert_eq!(ctx.fake.count_calls("launch local:snap-build"), 0);
    assert_eq!(ctx.fake.count_calls("delete"), 0);
    assert!(
        !ctx.fake
            .exec_log(&target)
            .contains(&"apt-get update".to_string())
    );
}

#[tokio::test]
async fn stopped_instance_is_started_before_checks() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    ctx.fake.add_instance(
        &target,
        false,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '0'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    let mut provider = ctx.direct_provider("snap-build");

    provider.setup().await.unwrap();

    assert_eq!(ctx.fake.count_calls("start local:snap-build"), 1);
    assert!(ctx.fake.instance_running(&target));
}

#[tokio::test]
async fn unfinished_instance_resumes_setup_in_place() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    ctx.fake
        .add_instance(&target, true, &[(target_paths::OS_RELEASE, FOCAL_OS_RELEASE)]);
    let mut provider = ctx.direct_provider("snap-build");

    provider.setup().await.unwrap();

    assert_eq!(ctx.fake.count_calls("launch"), 0);
    assert!(
        ctx.fake
            .exec_log(&target)
            .contains(&"apt-get update".to_string())
    );
    assert_eq!(ctx.stamp_revision(&target).as_deref(), Some("0"));
}

#[tokio::test]
async fn incompatible_instance_is_cleaned_and_relaunched() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    ctx.fake.add_instance(
        &target,
        true,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '7'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    let mut provider = ctx.direct_provider("snap-build");

    provider.setup().await.unwrap();

    let journal = ctx.fake.journal();
    let deleted = journal
        .iter()
        .position(|c| c == "delete local:snap-build")
        .unwrap();
    let launched = journal
        .iter()
        .position(|c| c.starts_with("launch local:snap-build"))
        .unwrap();
    assert!(deleted < launched);
    assert_eq!(ctx.stamp_revision(&target).as_deref(), Some("0"));
}

#[tokio::test]
async fn incompatible_instance_without_auto_clean_is_left_alone() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    ctx.fake.add_instance(
        &target,
        true,
        &[
            (target_paths::CRAFT_IMAGE_CONF, "revision: '7'\n"),
            (target_paths::OS_RELEASE, FOCAL_OS_RELEASE),
        ],
    );
    let mut options = LxdProviderOptions::new("snap-build");
    options.auto_clean = false;
    options.use_intermediate_image = false;
    let mut provider = ctx.provider(options);

    let err = provider.setup().await.unwrap_err();

    assert!(err.is_compatibility());
    assert_eq!(err.to_string(), "Expected image revision '0', found '7'");
    assert!(ctx.fake.instance_exists(&target));
    assert_eq!(ctx.stamp_revision(&target).as_deref(), Some("7"));
    assert_eq!(ctx.fake.count_calls("delete"), 0);
    assert_eq!(ctx.fake.count_calls("launch"), 0);
    assert!(provider.instance().is_none());
}

// ============================================================================
// BACKEND CONFIGURATION TESTS
// ============================================================================

#[tokio::test]
async fn image_remote_is_added_once() {
    let ctx = TestContext::new();

    ctx.direct_provider("a").setup().await.unwrap();
    ctx.direct_provider("b").setup().await.unwrap();

    assert_eq!(ctx.fake.count_calls("remote add ubuntu-buildd"), 1);
    assert_eq!(
        ctx.fake.remotes()["ubuntu-buildd"],
        RemoteConfig::new(BUILDD_ADDR, "simplestreams")
    );
}

#[rstest]
#[case::different_addr("https://example.com/images", "simplestreams")]
#[case::different_protocol(BUILDD_ADDR, "lxd")]
#[tokio::test]
async fn mismatched_image_remote_is_a_conflict(#[case] addr: &str, #[case] protocol: &str) {
    let ctx = TestContext::new();
    ctx.fake
        .add_remote("ubuntu-buildd", RemoteConfig::new(addr, protocol));

    let err = ctx
        .direct_provider("snap-build")
        .setup()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildboxError::ConfigConflict(_)));
    assert_eq!(ctx.fake.count_calls("launch"), 0);
}

#[tokio::test]
async fn missing_project_is_created_with_default_profile() {
    let ctx = TestContext::new();
    let mut options = LxdProviderOptions::new("snap-build");
    options.project = "snapcraft".into();
    let mut provider = ctx.provider(options);

    provider.setup().await.unwrap();

    assert!(ctx.fake.has_project("local", "snapcraft"));
    assert_eq!(
        ctx.fake.profile("local", "snapcraft", "default"),
        ctx.fake.profile("local", "default", "default")
    );
    assert_eq!(
        ctx.fake.image_aliases("local", "snapcraft"),
        vec![INTERMEDIATE.to_string()]
    );
    assert!(
        ctx.fake
            .instance_exists(&InstanceRef::new("snap-build", "snapcraft", "local"))
    );
}

#[tokio::test]
async fn unavailable_daemon_fails_before_any_change() {
    let ctx = TestContext::new();
    ctx.fake.set_available(false);

    let err = ctx
        .provider(LxdProviderOptions::new("snap-build"))
        .setup()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildboxError::NotFound(_)));
    assert!(ctx.fake.journal().is_empty());
}

// ============================================================================
// TEARDOWN TESTS
// ============================================================================

#[tokio::test]
async fn teardown_without_setup_is_a_noop() {
    let ctx = TestContext::new();
    let mut provider = ctx.provider(LxdProviderOptions::new("snap-build"));

    provider.teardown(true).await.unwrap();

    assert!(ctx.fake.journal().is_empty());
}

#[tokio::test]
async fn teardown_stops_ephemeral_instance() {
    let ctx = TestContext::new();
    let mut provider = ctx.direct_provider("snap-build");
    provider.setup().await.unwrap();

    provider.teardown(false).await.unwrap();

    // The daemon removes ephemeral instances on stop.
    assert!(!ctx.fake.instance_exists(&local("snap-build")));
    assert_eq!(ctx.fake.count_calls("delete"), 0);
}

#[tokio::test]
async fn teardown_keeps_persistent_instance_unless_cleaning() {
    let ctx = TestContext::new();
    let target = local("snap-build");
    let mut options = LxdProviderOptions::new("snap-build");
    options.use_ephemeral_instances = false;
    options.use_intermediate_image = false;
    let mut provider = ctx.provider(options);
    provider.setup().await.unwrap();

    provider.teardown(false).await.unwrap();
    assert!(ctx.fake.instance_exists(&target));
    assert!(!ctx.fake.instance_running(&target));

    provider.teardown(true).await.unwrap();
    assert!(!ctx.fake.instance_exists(&target));

    // Idempotent once the instance is gone.
    provider.teardown(true).await.unwrap();
    assert_eq!(ctx.fake.count_calls("delete local:snap-build"), 1);
}

#[tokio::test]
async fn stopped_persistent_instance_is_reused_after_teardown() {
    let ctx = TestContext::new();
    let mut options = LxdProviderOptions::new("snap-build");
    options.use_ephemeral_instances = false;
    let mut provider = ctx.provider(options.clone());
    provider.setup().await.unwrap();
    provider.teardown(false).await.unwrap();

    let mut provider = ctx.provider(options);
    provider.setup().await.unwrap();

    assert_eq!(ctx.fake.count_calls("launch local:snap-build"), 1);
    assert_eq!(ctx.fake.count_calls("start local:snap-build"), 1);
}

// ============================================================================
// INSTANCE EXECUTOR TESTS
// ============================================================================

#[tokio::test]
async fn instance_creates_files_with_mode_and_owner() {
    let ctx = TestContext::new();
    let instance = ctx.direct_provider("snap-build").setup().await.unwrap();

    instance
        .create_file(
            &FileSpec::new("/home/builder/.bashrc", "export PATH=$PATH:/snap/bin\n")
                .mode(0o600)
                .owner(1000, 1000),
        )
        .await
        .unwrap();

    let file = ctx
        .fake
        .file(&local("snap-build"), "/home/builder/.bashrc")
        .unwrap();
    assert_eq!(file.content, b"export PATH=$PATH:/snap/bin\n");
    assert_eq!(file.mode, 0o600);
    assert_eq!((file.uid, file.gid), (1000, 1000));
}

#[tokio::test]
async fn instance_mount_adds_disk_device() {
    let ctx = TestContext::new();
    let instance = ctx.direct_provider("snap-build").setup().await.unwrap();

    let mounted = instance
        .mount(Path::new("/home/me/project"), Path::new("/root/project"))
        .await
        .unwrap();

    assert!(mounted);
    let devices = ctx.fake.devices(&local("snap-build"));
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].0, "disk-root-project");
    assert_eq!(devices[0].2, Path::new("/root/project"));
}

#[tokio::test]
async fn instance_sync_round_trip() {
    let ctx = TestContext::new();
    let instance = ctx.direct_provider("snap-build").setup().await.unwrap();
    let temp_dir = TempDir::new().unwrap();

    let source = temp_dir.path().join("project");
    std::fs::create_dir_all(source.join("src")).unwrap();
    std::fs::write(source.join("snapcraft.yaml"), "name: hello\n").unwrap();
    std::fs::write(source.join("src/main.c"), "int main() { return 0; }\n").unwrap();

    instance
        .sync_to(&source, Path::new("/root/project"))
        .await
        .unwrap();
    assert_eq!(
        ctx.fake
            .read_file(&local("snap-build"), "/root/project/src/main.c")
            .as_deref(),
        Some("int main() { return 0; }\n")
    );

    let pulled = temp_dir.path().join("pulled");
    instance
        .sync_from(Path::new("/root/project"), &pulled)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(pulled.join("snapcraft.yaml")).unwrap(),
        "name: hello\n"
    );
    assert_eq!(
        std::fs::read_to_string(pulled.join("src/main.c")).unwrap(),
        "int main() { return 0; }\n"
    );
}

#[tokio::test]
async fn instance_sync_single_file() {
    let ctx = TestContext::new();
    let instance = ctx.direct_provider("snap-build").setup().await.unwrap();
    let temp_dir = TempDir::new().unwrap();

    let pulled = temp_dir.path().join("out/hostname");
    instance
        .sync_from(Path::new(target_paths::HOSTNAME), &pulled)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&pulled).unwrap(),
        "craft-buildd-instance"
    );
}

#[tokio::test]
async fn instance_sync_missing_source_is_not_found() {
    let ctx = TestContext::new();
    let instance = ctx.direct_provider("snap-build").setup().await.unwrap();
    let temp_dir = TempDir::new().unwrap();

    let err = instance
        .sync_to(&temp_dir.path().join("missing"), Path::new("/root/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, BuildboxError::NotFound(_)));

    let err = instance
        .sync_from(Path::new("/root/missing"), &temp_dir.path().join("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, BuildboxError::NotFound(_)));
}
