use crate::build_system::{BuildSystem, BuildSystemRegistry};
use crate::config::ProjectConfig;
use crate::core::VcsKind;
use crate::detection::DiscoveryCoordinator;
use crate::device::DeviceManager;
use crate::error::{FoundryError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything known about the project being built.
pub struct ProjectContext {
    root: PathBuf,
    project_name: String,
    vcs_kind: VcsKind,
    project_config: ProjectConfig,
    build_system: Arc<dyn BuildSystem>,
    devices: DeviceManager,
}

impl ProjectContext {
    /// Opens the project at `path` and resolves its build system.
    pub async fn open(
        path: &Path,
        discovery: &DiscoveryCoordinator,
        build_systems: &BuildSystemRegistry,
        devices: DeviceManager,
    ) -> Result<Self> {
        let root = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| project_error(path, e.to_string()))?;

        if !root.is_dir() {
            return Err(project_error(path, "not a directory".to_string()));
        }

        let project_config =
            ProjectConfig::load(&root).map_err(|e| project_error(path, e.to_string()))?;

        let build_system_id = discovery
            .discover_async(root.clone(), project_config.build_system.clone())
            .await?;
        debug!(build_system = %build_system_id, "discovered build system");

        let build_system = build_systems
            .get(&build_system_id)
            .ok_or(FoundryError::BuildSystemNotFound(build_system_id))?;

        let project_name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        let vcs_kind = VcsKind::detect(&root);
        info!(project = %project_name, vcs = vcs_kind.as_str(), "opened project");

        Ok(Self {
            root,
            project_name,
            vcs_kind,
            project_config,
            build_system,
            devices,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn vcs_kind(&self) -> VcsKind {
        self.vcs_kind
    }

    pub fn build_system_kind(&self) -> &str {
        self.build_system.id()
    }

    pub fn build_system(&self) -> &Arc<dyn BuildSystem> {
        &self.build_system
    }

    pub fn project_config(&self) -> &ProjectConfig {
        &self.project_config
    }

    pub fn device_manager(&self) -> &DeviceManager {
        &self.devices
    }
}

fn project_error(path: &Path, reason: String) -> FoundryError {
    FoundryError::ProjectOpen {
        path: path.to_path_buf(),
        reason,
    }
}
