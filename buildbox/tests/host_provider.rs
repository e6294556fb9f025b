//! Integration tests for the host provider and executor.

use std::path::Path;

use buildbox::executor::{ExecCommand, Executor};
use buildbox::{BuildboxError, HostProvider, HostProviderOptions, Provider};
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Host provider that runs commands as the current user.
fn unprivileged_provider() -> HostProvider {
    HostProvider::new(HostProviderOptions { sudo_user: None })
}

fn write_tree(root: &Path) {
    std::fs::create_dir_all(root.join("parts/hello/src")).unwrap();
    std::fs::write(root.join("snapcraft.yaml"), "name: hello\nbase: core20\n").unwrap();
    std::fs::write(root.join("parts/hello/src/hello.c"), "int main(void) {}\n").unwrap();
}

// ============================================================================
// PROVIDER TESTS
// ============================================================================

#[tokio::test]
async fn setup_returns_executor_running_on_host() {
    let mut provider = unprivileged_provider();
    let executor = provider.setup().await.unwrap();

    let output = executor
        .execute_run(&ExecCommand::new("echo").arg("hello").check(true))
        .await
        .unwrap();

    assert_eq!(output.stdout_str(), "hello\n");
    provider.teardown(true).await.unwrap();
}

#[tokio::test]
async fn default_provider_runs_through_sudo_as_root() {
    let mut provider = HostProvider::default();
    let executor = provider.setup().await.unwrap();

    assert_eq!(executor.sudo_user(), Some("root"));
    assert_eq!(
        executor.prepare_argv(&ExecCommand::new("true")),
        ["sudo", "-H", "-u", "root", "true"]
    );
}

// ============================================================================
// SYNC TESTS
// ============================================================================

#[tokio::test]
async fn sync_round_trip_preserves_tree() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("source");
    let staged = temp_dir.path().join("staged");
    let returned = temp_dir.path().join("returned");
    write_tree(&source);

    let executor = unprivileged_provider().setup().await.unwrap();
    executor.sync_to(&source, &staged).await.unwrap();
    executor.sync_from(&staged, &returned).await.unwrap();

    for relative in ["snapcraft.yaml", "parts/hello/src/hello.c"] {
        assert_eq!(
            std::fs::read(source.join(relative)).unwrap(),
            std::fs::read(returned.join(relative)).unwrap(),
            "{} differs",
            relative
        );
    }
}

#[tokio::test]
async fn sync_merges_into_existing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("source");
    let destination = temp_dir.path().join("destination");
    write_tree(&source);
    std::fs::create_dir_all(&destination).unwrap();
    std::fs::write(destination.join("keep.txt"), "kept").unwrap();
    std::fs::write(destination.join("snapcraft.yaml"), "stale").unwrap();

    let executor = unprivileged_provider().setup().await.unwrap();
    executor.sync_to(&source, &destination).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(destination.join("keep.txt")).unwrap(),
        "kept"
    );
    assert_eq!(
        std::fs::read_to_string(destination.join("snapcraft.yaml")).unwrap(),
        "name: hello\nbase: core20\n"
    );
}

#[tokio::test]
async fn sync_single_file() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("snapcraft.yaml");
    std::fs::write(&source, "name: hello\n").unwrap();
    let destination = temp_dir.path().join("out/snapcraft.yaml");

    let executor = unprivileged_provider().setup().await.unwrap();
    executor.sync_to(&source, &destination).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&destination).unwrap(),
        "name: hello\n"
    );
}

#[tokio::test]
async fn sync_missing_source_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let executor = unprivileged_provider().setup().await.unwrap();

    let err = executor
        .sync_to(&temp_dir.path().join("missing"), &temp_dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, BuildboxError::NotFound(_)));
    assert!(err.to_string().contains("not found"));
}
