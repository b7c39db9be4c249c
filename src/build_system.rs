use crate::config::BuildConfiguration;
use crate::core::{BuildPhase, Device};
use crate::error::{FoundryError, Result};
use crate::execution::{BuildStep, Builder};
use crate::runtime::Runtime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// How a build system throws away previous build results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanStrategy {
    /// Out-of-tree builds: delete the build directory.
    RemoveDir(PathBuf),
    /// In-tree builds: run the tool's own clean command.
    Steps(Vec<BuildStep>),
    Nothing,
}

/// A backend that knows how to configure and compile a project tree.
pub trait BuildSystem: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Ordered configure and build steps for `project_dir`.
    fn steps(&self, project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep>;

    fn clean(&self, project_dir: &Path, config: &BuildConfiguration) -> CleanStrategy;

    /// Validates the combination and assembles the full step list, including
    /// the configuration's prebuild and postbuild commands.
    fn get_builder(
        &self,
        project_dir: &Path,
        config: &BuildConfiguration,
        device: &Device,
        runtime: &Runtime,
    ) -> Result<Builder> {
        if !runtime.supports_device(device) {
            return Err(FoundryError::BuilderConstruction(format!(
                "Runtime \"{}\" cannot build for device \"{}\"",
                runtime.id(),
                device.id
            )));
        }

        let mut builder = Builder::new(self.id(), project_dir, device.clone(), runtime.clone());
        builder.environment = config.environment.clone();

        builder.steps.extend(
            config
                .prebuild
                .iter()
                .map(|script| BuildStep::shell(BuildPhase::Prebuild, script.as_str())),
        );

        if config.rebuild {
            match self.clean(project_dir, config) {
                CleanStrategy::RemoveDir(dir) => builder.clean_dirs.push(dir),
                CleanStrategy::Steps(steps) => builder.steps.extend(steps),
                CleanStrategy::Nothing => {}
            }
        }

        builder.steps.extend(self.steps(project_dir, config));

        builder.steps.extend(
            config
                .postbuild
                .iter()
                .map(|script| BuildStep::shell(BuildPhase::Postbuild, script.as_str())),
        );

        for step in &builder.steps {
            // Relative and absolute paths are resolved by the step itself.
            if step.program.contains('/') {
                continue;
            }
            if !runtime.contains_program_in_path(&step.program) {
                return Err(FoundryError::BuilderConstruction(format!(
                    "{} is not installed in runtime \"{}\"",
                    step.program,
                    runtime.id()
                )));
            }
        }

        debug!(
            build_system = self.id(),
            runtime = runtime.id(),
            steps = builder.steps.len(),
            "constructed builder"
        );
        Ok(builder)
    }
}

pub struct Meson;

impl BuildSystem for Meson {
    fn id(&self) -> &str {
        "meson"
    }

    fn display_name(&self) -> &str {
        "Meson"
    }

    fn steps(&self, project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        let builddir = config.builddir.display().to_string();
        let mut steps = Vec::new();
        // Reconfiguring an existing build directory is an error for meson.
        if config.rebuild || !config.builddir.join("build.ninja").exists() {
            steps.push(
                BuildStep::new(BuildPhase::Configure, "meson")
                    .args(["setup", builddir.as_str()])
                    .args(config.config_opts.iter().cloned())
                    .current_dir(project_dir),
            );
        }
        steps.push(BuildStep::new(BuildPhase::Build, "meson").args(["compile", "-C", builddir.as_str()]));
        steps
    }

    fn clean(&self, _project_dir: &Path, config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::RemoveDir(config.builddir.clone())
    }
}

pub struct CMake;

impl BuildSystem for CMake {
    fn id(&self) -> &str {
        "cmake"
    }

    fn display_name(&self) -> &str {
        "CMake"
    }

    fn steps(&self, project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        let source = project_dir.display().to_string();
        let builddir = config.builddir.display().to_string();
        vec![
            BuildStep::new(BuildPhase::Configure, "cmake")
                .args(["-S", source.as_str(), "-B", builddir.as_str()])
                .args(config.config_opts.iter().cloned()),
            BuildStep::new(BuildPhase::Build, "cmake").args(["--build", builddir.as_str()]),
        ]
    }

    fn clean(&self, _project_dir: &Path, config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::RemoveDir(config.builddir.clone())
    }
}

pub struct Autotools;

impl BuildSystem for Autotools {
    fn id(&self) -> &str {
        "autotools"
    }

    fn display_name(&self) -> &str {
        "Autotools"
    }

    fn steps(&self, project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        let mut steps = Vec::new();
        if !project_dir.join("configure").is_file() {
            steps.push(BuildStep::new(BuildPhase::Configure, "autoreconf").arg("-fi"));
        }
        steps.push(
            BuildStep::new(BuildPhase::Configure, "./configure").args(config.config_opts.iter().cloned()),
        );
        steps.push(BuildStep::new(BuildPhase::Build, "make"));
        steps
    }

    fn clean(&self, project_dir: &Path, _config: &BuildConfiguration) -> CleanStrategy {
        if project_dir.join("Makefile").is_file() {
            CleanStrategy::Steps(vec![BuildStep::new(BuildPhase::Clean, "make").arg("clean")])
        } else {
            CleanStrategy::Nothing
        }
    }
}

pub struct Cargo;

impl BuildSystem for Cargo {
    fn id(&self) -> &str {
        "cargo"
    }

    fn display_name(&self) -> &str {
        "Cargo"
    }

    fn steps(&self, _project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        vec![BuildStep::new(BuildPhase::Build, "cargo")
            .arg("build")
            .args(config.config_opts.iter().cloned())]
    }

    fn clean(&self, _project_dir: &Path, _config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::Steps(vec![BuildStep::new(BuildPhase::Clean, "cargo").arg("clean")])
    }
}

pub struct Phpize;

impl BuildSystem for Phpize {
    fn id(&self) -> &str {
        "phpize"
    }

    fn display_name(&self) -> &str {
        "PHP Extension"
    }

    fn steps(&self, _project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        vec![
            BuildStep::new(BuildPhase::Configure, "phpize"),
            BuildStep::new(BuildPhase::Configure, "./configure").args(config.config_opts.iter().cloned()),
            BuildStep::new(BuildPhase::Build, "make"),
        ]
    }

    fn clean(&self, _project_dir: &Path, _config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::Steps(vec![BuildStep::new(BuildPhase::Clean, "phpize").arg("--clean")])
    }
}

pub struct SCons;

impl BuildSystem for SCons {
    fn id(&self) -> &str {
        "scons"
    }

    fn display_name(&self) -> &str {
        "SCons"
    }

    fn steps(&self, _project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        vec![BuildStep::new(BuildPhase::Build, "scons").args(config.config_opts.iter().cloned())]
    }

    fn clean(&self, _project_dir: &Path, _config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::Steps(vec![BuildStep::new(BuildPhase::Clean, "scons").arg("-c")])
    }
}

pub struct Make;

impl BuildSystem for Make {
    fn id(&self) -> &str {
        "make"
    }

    fn display_name(&self) -> &str {
        "Make"
    }

    fn steps(&self, _project_dir: &Path, config: &BuildConfiguration) -> Vec<BuildStep> {
        vec![BuildStep::new(BuildPhase::Build, "make").args(config.config_opts.iter().cloned())]
    }

    fn clean(&self, _project_dir: &Path, _config: &BuildConfiguration) -> CleanStrategy {
        CleanStrategy::Steps(vec![BuildStep::new(BuildPhase::Clean, "make").arg("clean")])
    }
}

/// Build systems by id. Discovery yields an id; this resolves it.
#[derive(Clone, Default)]
pub struct BuildSystemRegistry {
    systems: HashMap<String, Arc<dyn BuildSystem>>,
}

impl BuildSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Meson));
        registry.register(Arc::new(CMake));
        registry.register(Arc::new(Cargo));
        registry.register(Arc::new(Autotools));
        registry.register(Arc::new(Phpize));
        registry.register(Arc::new(SCons));
        registry.register(Arc::new(Make));
        registry
    }

    /// Registers `system`, replacing any previous one with the same id.
    pub fn register(&mut self, system: Arc<dyn BuildSystem>) {
        self.systems.insert(system.id().to_string(), system);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn BuildSystem>> {
        self.systems.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.systems.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
