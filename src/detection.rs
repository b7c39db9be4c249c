use crate::core::DiscoveryVote;
use crate::error::{FoundryError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hint value that never pre-seeds discovery.
pub const GREETER_HINT: &str = "greeter";

/// A backend that may vote for the build system of a project directory.
///
/// Backends must not mutate shared state while voting; the coordinator calls
/// them from a blocking worker thread.
pub trait BuildSystemDiscovery: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Ok(None)` to decline.
    fn discover(&self, directory: &Path) -> anyhow::Result<Option<DiscoveryVote>>;
}

/// Votes for a build system when one of its manifest files is present.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    build_system_id: &'static str,
    manifests: &'static [&'static str],
    priority: i32,
}

impl ManifestDiscovery {
    pub const fn new(
        build_system_id: &'static str,
        manifests: &'static [&'static str],
        priority: i32,
    ) -> Self {
        Self {
            build_system_id,
            manifests,
            priority,
        }
    }
}

impl BuildSystemDiscovery for ManifestDiscovery {
    fn name(&self) -> &str {
        self.build_system_id
    }

    fn discover(&self, directory: &Path) -> anyhow::Result<Option<DiscoveryVote>> {
        for manifest in self.manifests {
            if directory.join(manifest).is_file() {
                return Ok(Some(DiscoveryVote::new(self.build_system_id, self.priority)));
            }
        }
        Ok(None)
    }
}

pub fn default_discoveries() -> Vec<Arc<dyn BuildSystemDiscovery>> {
    vec![
        Arc::new(ManifestDiscovery::new("meson", &["meson.build"], -200)),
        Arc::new(ManifestDiscovery::new("cmake", &["CMakeLists.txt"], -100)),
        Arc::new(ManifestDiscovery::new("cargo", &["Cargo.toml"], -100)),
        Arc::new(ManifestDiscovery::new(
            "autotools",
            &["configure.ac", "configure.in"],
            0,
        )),
        Arc::new(ManifestDiscovery::new("phpize", &["config.m4"], 100)),
        Arc::new(ManifestDiscovery::new("scons", &["SConstruct", "SConscript"], 500)),
        Arc::new(ManifestDiscovery::new(
            "make",
            &["Makefile", "makefile", "GNUmakefile"],
            1000,
        )),
    ]
}

/// Fans a project directory out to every registered backend and keeps the
/// best vote.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    backends: Arc<[Arc<dyn BuildSystemDiscovery>]>,
}

impl Default for DiscoveryCoordinator {
    fn default() -> Self {
        Self::new(default_discoveries())
    }
}

impl DiscoveryCoordinator {
    /// Backends are consulted in the given order, which also breaks ties.
    pub fn new(backends: Vec<Arc<dyn BuildSystemDiscovery>>) -> Self {
        Self {
            backends: backends.into(),
        }
    }

    pub fn backends(&self) -> usize {
        self.backends.len()
    }

    /// Selects the lowest-priority vote. The first backend to reach a
    /// priority keeps it; equal votes later in the order do not replace it.
    ///
    /// A hint other than [`GREETER_HINT`] is seeded with `i32::MIN` and is
    /// returned without consulting any backend.
    pub fn discover(&self, directory: &Path, hint: Option<&str>) -> Result<String> {
        let mut best: Option<DiscoveryVote> = hint
            .filter(|hint| *hint != GREETER_HINT)
            .map(|hint| DiscoveryVote::new(hint, i32::MIN));

        if let Some(vote) = &best {
            debug!(build_system = %vote.build_system_id, "using build system hint");
            return Ok(vote.build_system_id.clone());
        }

        for backend in self.backends.iter() {
            let vote = match backend.discover(directory) {
                Ok(Some(vote)) => vote,
                Ok(None) => continue,
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "discovery backend failed");
                    continue;
                }
            };

            debug!(
                backend = backend.name(),
                build_system = %vote.build_system_id,
                priority = vote.priority,
                "discovery vote"
            );

            let replace = match &best {
                Some(current) => vote.priority < current.priority,
                None => true,
            };
            if replace {
                best = Some(vote);
            }
        }

        best.map(|vote| vote.build_system_id)
            .ok_or_else(|| FoundryError::DiscoveryNotSupported(directory.to_path_buf()))
    }

    /// Runs [`discover`](Self::discover) on the blocking thread pool.
    pub async fn discover_async(&self, directory: PathBuf, hint: Option<String>) -> Result<String> {
        let coordinator = self.clone();
        tokio::task::spawn_blocking(move || coordinator.discover(&directory, hint.as_deref()))
            .await
            .map_err(|e| FoundryError::io("discovery worker failed", std::io::Error::other(e)))?
    }
}
