//! Runtime provider backed by the `podman` container tool.
//!
//! Loading first checks `podman exec --help` for `--preserve-fds`, then lists
//! containers with `podman ps --all --format=json` and registers one runtime
//! per container.

use crate::error::{FoundryError, Result};
use crate::runtime::{Runtime, RuntimeKind, RuntimeProvider, RuntimeRegistry};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use tokio::process::Command;
use tracing::{debug, info};

pub const PODMAN_RUNTIME_PREFIX: &str = "podman:";
const REQUIRED_EXEC_FLAG: &str = "--preserve-fds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// One element of `podman ps --format=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PodmanContainer {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: Option<String>,
    #[serde(rename = "State", default)]
    pub state: Option<String>,
}

impl PodmanContainer {
    pub fn runtime_id(&self) -> String {
        format!("{}{}", PODMAN_RUNTIME_PREFIX, self.id)
    }

    fn into_runtime(self, tool: &Path) -> Runtime {
        let display_name = self
            .names
            .first()
            .cloned()
            .unwrap_or_else(|| self.id.chars().take(12).collect());

        Runtime::new(
            self.runtime_id(),
            "Podman",
            RuntimeKind::Podman {
                container_id: self.id,
                tool: tool.to_path_buf(),
            },
        )
        .with_display_name(display_name)
    }
}

pub struct PodmanRuntimeProvider {
    tool: PathBuf,
    state: ProviderState,
    owned: Vec<Rc<Runtime>>,
}

impl Default for PodmanRuntimeProvider {
    fn default() -> Self {
        Self::new("podman")
    }
}

impl PodmanRuntimeProvider {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            state: ProviderState::Unloaded,
            owned: Vec::new(),
        }
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// Runtimes this provider has registered and not yet removed.
    pub fn owned_runtimes(&self) -> &[Rc<Runtime>] {
        &self.owned
    }

    async fn run_tool(&self, args: &[&str]) -> Result<String> {
        let program = self.tool.display().to_string();
        let output = Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| FoundryError::SubprocessSpawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(FoundryError::subprocess_exit(
                format!("{} {}", program, args.join(" ")),
                output.status,
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| FoundryError::MalformedOutput {
            program,
            reason: e.to_string(),
        })
    }

    async fn check_exec_support(&self) -> Result<()> {
        let help = self.run_tool(&["exec", "--help"]).await?;
        if !help.contains(REQUIRED_EXEC_FLAG) {
            return Err(FoundryError::UnsupportedProvider {
                program: self.tool.display().to_string(),
                flag: format!("exec {}", REQUIRED_EXEC_FLAG),
            });
        }
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<PodmanContainer>> {
        let stdout = self.run_tool(&["ps", "--all", "--format=json"]).await?;
        parse_containers(&stdout).map_err(|e| FoundryError::MalformedOutput {
            program: self.tool.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn load_runtimes(&mut self, runtimes: &mut RuntimeRegistry) -> Result<()> {
        self.check_exec_support().await?;
        let containers = self.list_containers().await?;
        debug!(count = containers.len(), "discovered podman containers");

        for container in containers {
            let runtime = Rc::new(container.into_runtime(&self.tool));
            runtimes.add(Rc::clone(&runtime));
            self.owned.push(runtime);
        }
        Ok(())
    }
}

/// Parses the container list; every element must be well formed.
pub fn parse_containers(json: &str) -> serde_json::Result<Vec<PodmanContainer>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
}

#[async_trait(?Send)]
impl RuntimeProvider for PodmanRuntimeProvider {
    fn name(&self) -> &str {
        "podman"
    }

    fn provides(&self, runtime_id: &str) -> bool {
        runtime_id.starts_with(PODMAN_RUNTIME_PREFIX)
    }

    async fn load(&mut self, runtimes: &mut RuntimeRegistry) -> Result<()> {
        if self.state != ProviderState::Unloaded {
            return Err(FoundryError::ProviderBusy(self.name().to_string()));
        }

        self.state = ProviderState::Loading;
        match self.load_runtimes(runtimes).await {
            Ok(()) => {
                info!(runtimes = self.owned.len(), "podman runtime provider loaded");
                self.state = ProviderState::Loaded;
                Ok(())
            }
            Err(e) => {
                self.state = ProviderState::Unloaded;
                Err(e)
            }
        }
    }

    async fn unload(&mut self, runtimes: &mut RuntimeRegistry) -> Result<()> {
        self.state = ProviderState::Unloading;
        for runtime in self.owned.drain(..) {
            runtimes.remove(&runtime);
        }
        self.state = ProviderState::Unloaded;
        Ok(())
    }
}
