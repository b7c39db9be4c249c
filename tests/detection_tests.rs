use ide_build::core::DiscoveryVote;
use ide_build::detection::{BuildSystemDiscovery, DiscoveryCoordinator, GREETER_HINT};
use ide_build::FoundryError;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// Always votes for `id` at `priority`, counting how often it was asked.
struct FixedVote {
    id: &'static str,
    priority: i32,
    calls: Arc<AtomicUsize>,
}

impl FixedVote {
    fn new(id: &'static str, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            priority,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl BuildSystemDiscovery for FixedVote {
    fn name(&self) -> &str {
        self.id
    }

    fn discover(&self, _directory: &Path) -> anyhow::Result<Option<DiscoveryVote>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(DiscoveryVote::new(self.id, self.priority)))
    }
}

struct Declines;

impl BuildSystemDiscovery for Declines {
    fn name(&self) -> &str {
        "declines"
    }

    fn discover(&self, _directory: &Path) -> anyhow::Result<Option<DiscoveryVote>> {
        Ok(None)
    }
}

struct Broken;

impl BuildSystemDiscovery for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn discover(&self, _directory: &Path) -> anyhow::Result<Option<DiscoveryVote>> {
        anyhow::bail!("permission denied while probing")
    }
}

#[tokio::test]
async fn test_detect_meson_over_make() {
    let dir = tempdir().unwrap();
    File::create(dir.path().join("meson.build")).unwrap();
    File::create(dir.path().join("Makefile")).unwrap();

    let coordinator = DiscoveryCoordinator::default();
    let id = coordinator
        .discover_async(dir.path().to_path_buf(), None)
        .await
        .unwrap();

    assert_eq!(id, "meson");
}

#[tokio::test]
async fn test_detect_makefile_project() {
    let dir = tempdir().unwrap();
    File::create(dir.path().join("Makefile")).unwrap();

    let id = DiscoveryCoordinator::default()
        .discover(dir.path(), None)
        .unwrap();
    assert_eq!(id, "make");
}

#[tokio::test]
async fn test_cmake_and_cargo_tie_goes_to_first_registered() {
    let dir = tempdir().unwrap();
    File::create(dir.path().join("CMakeLists.txt")).unwrap();
    File::create(dir.path().join("Cargo.toml")).unwrap();

    let id = DiscoveryCoordinator::default()
        .discover(dir.path(), None)
        .unwrap();
    assert_eq!(id, "cmake");
}

#[test]
fn test_lowest_priority_wins() {
    let dir = tempdir().unwrap();
    let coordinator = DiscoveryCoordinator::new(vec![
        FixedVote::new("autotools", 0),
        Arc::new(Declines),
        FixedVote::new("meson", -200),
        FixedVote::new("make", 1000),
    ]);

    assert_eq!(coordinator.discover(dir.path(), None).unwrap(), "meson");
}

#[test]
fn test_equal_priority_does_not_replace() {
    let dir = tempdir().unwrap();
    let coordinator = DiscoveryCoordinator::new(vec![
        FixedVote::new("first", 10),
        FixedVote::new("second", 10),
        FixedVote::new("third", 10),
    ]);

    assert_eq!(coordinator.discover(dir.path(), None).unwrap(), "first");
}

#[test]
fn test_hint_short_circuits_backends() {
    let dir = tempdir().unwrap();
    let voter = FixedVote::new("meson", i32::MIN);
    let calls = Arc::clone(&voter.calls);
    let coordinator = DiscoveryCoordinator::new(vec![voter]);

    let id = coordinator.discover(dir.path(), Some("phpize")).unwrap();

    assert_eq!(id, "phpize");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_greeter_hint_is_ignored() {
    let dir = tempdir().unwrap();
    let coordinator = DiscoveryCoordinator::new(vec![FixedVote::new("cmake", -100)]);

    let id = coordinator.discover(dir.path(), Some(GREETER_HINT)).unwrap();
    assert_eq!(id, "cmake");
}

#[test]
fn test_failing_backend_counts_as_no_vote() {
    let dir = tempdir().unwrap();
    let coordinator =
        DiscoveryCoordinator::new(vec![Arc::new(Broken), FixedVote::new("scons", 500)]);

    assert_eq!(coordinator.discover(dir.path(), None).unwrap(), "scons");
}

#[test]
fn test_no_votes_is_not_supported() {
    let dir = tempdir().unwrap();
    let coordinator = DiscoveryCoordinator::new(vec![Arc::new(Declines), Arc::new(Broken)]);

    let err = coordinator.discover(dir.path(), None).unwrap_err();
    assert!(matches!(err, FoundryError::DiscoveryNotSupported(_)));

    let empty = tempdir().unwrap();
    assert!(DiscoveryCoordinator::default()
        .discover(empty.path(), None)
        .is_err());
}
