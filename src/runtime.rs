//! Runtimes, the registry that owns them, and the providers that fill it.
//!
//! The registry and manager hold `Rc`s and are therefore `!Send`: they live on
//! the thread driving the supervisor and are only mutated from there.

use crate::config::HOST_RUNTIME_ID;
use crate::core::{Device, DeviceKind};
use crate::error::{FoundryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Can build for the machine it runs on.
    LocalDevice,
    Containerized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeKind {
    Host,
    Podman { container_id: String, tool: PathBuf },
}

/// An execution environment builds can run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    id: String,
    category: String,
    display_name: Option<String>,
    kind: RuntimeKind,
    capabilities: BTreeSet<Capability>,
}

impl Runtime {
    pub fn new(id: impl Into<String>, category: impl Into<String>, kind: RuntimeKind) -> Self {
        let mut capabilities = BTreeSet::from([Capability::LocalDevice]);
        if matches!(kind, RuntimeKind::Podman { .. }) {
            capabilities.insert(Capability::Containerized);
        }

        Self {
            id: id.into(),
            category: category.into(),
            display_name: None,
            kind,
            capabilities,
        }
    }

    pub fn host() -> Self {
        Self::new(HOST_RUNTIME_ID, "Host System", RuntimeKind::Host)
            .with_display_name("Host operating system")
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> &RuntimeKind {
        &self.kind
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn supports_device(&self, device: &Device) -> bool {
        match device.kind {
            DeviceKind::Local => self.has_capability(Capability::LocalDevice),
            DeviceKind::Remote => false,
        }
    }

    /// Whether `program` can be resolved inside this runtime.
    ///
    /// Container runtimes cannot be inspected without exec'ing into them, so
    /// they are assumed to provide every program.
    pub fn contains_program_in_path(&self, program: &str) -> bool {
        match &self.kind {
            RuntimeKind::Host => find_program_in_path(program).is_some(),
            RuntimeKind::Podman { .. } => true,
        }
    }

    /// Builds the invocation of `program` inside this runtime.
    pub fn command(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        environment: &BTreeMap<String, String>,
    ) -> Command {
        match &self.kind {
            RuntimeKind::Host => {
                let mut command = Command::new(program);
                command.args(args).current_dir(cwd).envs(environment);
                command
            }
            RuntimeKind::Podman { container_id, tool } => {
                let mut command = Command::new(tool);
                command.arg("exec").arg("--workdir").arg(cwd);
                for (key, value) in environment {
                    command.arg("--env").arg(format!("{}={}", key, value));
                }
                command.arg(container_id).arg(program).args(args);
                command
            }
        }
    }
}

fn find_program_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Change notification emitted by the registry after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsChanged {
    pub position: usize,
    pub removed: usize,
    pub added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(usize);

type Observer = Box<dyn FnMut(&ItemsChanged)>;

/// Append-ordered collection of live runtimes.
pub struct RuntimeRegistry {
    runtimes: Vec<Rc<Runtime>>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: usize,
    unloading: bool,
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeRegistry {
    /// Creates a registry seeded with the host runtime.
    pub fn new() -> Self {
        Self {
            runtimes: vec![Rc::new(Runtime::host())],
            observers: Vec::new(),
            next_subscription: 0,
            unloading: false,
        }
    }

    pub fn add(&mut self, runtime: Rc<Runtime>) {
        let position = self.runtimes.len();
        debug!(runtime = runtime.id(), position, "adding runtime");
        self.runtimes.push(runtime);
        self.emit(ItemsChanged {
            position,
            removed: 0,
            added: 1,
        });
    }

    /// Removes `runtime` by identity. Returns whether it was present.
    pub fn remove(&mut self, runtime: &Rc<Runtime>) -> bool {
        if self.unloading {
            return false;
        }

        let Some(position) = self.runtimes.iter().position(|r| Rc::ptr_eq(r, runtime)) else {
            return false;
        };

        debug!(runtime = runtime.id(), position, "removing runtime");
        self.runtimes.remove(position);
        self.emit(ItemsChanged {
            position,
            removed: 1,
            added: 0,
        });
        true
    }

    pub fn get_by_id(&self, id: &str) -> Option<Rc<Runtime>> {
        self.runtimes.iter().find(|r| r.id() == id).cloned()
    }

    pub fn get(&self, position: usize) -> Option<Rc<Runtime>> {
        self.runtimes.get(position).cloned()
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Runtime>> {
        self.runtimes.iter()
    }

    pub fn connect_items_changed<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&ItemsChanged) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn disconnect(&mut self, id: SubscriptionId) {
        self.observers.retain(|(sub, _)| *sub != id);
    }

    fn emit(&mut self, change: ItemsChanged) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&change);
        }
    }
}

/// A backend that discovers runtimes and pushes them into the registry.
#[async_trait(?Send)]
pub trait RuntimeProvider {
    fn name(&self) -> &str;

    /// Whether runtimes with this id belong to this provider. Must not depend
    /// on the provider having loaded.
    fn provides(&self, runtime_id: &str) -> bool;

    async fn load(&mut self, runtimes: &mut RuntimeRegistry) -> Result<()>;

    async fn unload(&mut self, runtimes: &mut RuntimeRegistry) -> Result<()>;
}

/// Owns the runtime registry and the registered providers.
pub struct RuntimeManager {
    runtimes: RuntimeRegistry,
    providers: Vec<Box<dyn RuntimeProvider>>,
}

impl RuntimeManager {
    /// Creates the manager and loads every provider in order. Load failures
    /// are logged; the provider stays registered. A provider whose tool is
    /// not installed simply contributes no runtimes.
    pub async fn new(providers: Vec<Box<dyn RuntimeProvider>>) -> Self {
        let mut manager = Self {
            runtimes: RuntimeRegistry::new(),
            providers: Vec::with_capacity(providers.len()),
        };

        for provider in providers {
            match manager.register_provider(provider).await {
                Ok(()) => {}
                Err(e) if e.is_missing_program() => {
                    debug!(error = %e, "runtime provider tool is not installed")
                }
                Err(e) => warn!(error = %e, "runtime provider failed to load"),
            }
        }

        manager
    }

    pub fn runtimes(&self) -> &RuntimeRegistry {
        &self.runtimes
    }

    pub fn runtimes_mut(&mut self) -> &mut RuntimeRegistry {
        &mut self.runtimes
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name())
    }

    pub async fn register_provider(&mut self, mut provider: Box<dyn RuntimeProvider>) -> Result<()> {
        info!(provider = provider.name(), "loading runtime provider");
        let result = provider.load(&mut self.runtimes).await;
        self.providers.push(provider);
        result
    }

    /// Unloads and drops the provider named `name`. Returns whether one was
    /// registered.
    pub async fn unregister_provider(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.providers.iter().position(|p| p.name() == name) else {
            return Ok(false);
        };

        let mut provider = self.providers.remove(index);
        info!(provider = provider.name(), "unloading runtime provider");
        provider.unload(&mut self.runtimes).await?;
        Ok(true)
    }

    pub fn get_runtime(&self, id: &str) -> Option<Rc<Runtime>> {
        self.runtimes.get_by_id(id)
    }

    /// Returns the runtime `id`, distinguishing "nobody provides it" from "a
    /// provider claims it but has not registered it".
    pub fn ensure(&self, id: &str) -> Result<Rc<Runtime>> {
        if let Some(runtime) = self.runtimes.get_by_id(id) {
            return Ok(runtime);
        }

        match self.providers.iter().find(|p| p.provides(id)) {
            Some(provider) => {
                debug!(provider = provider.name(), runtime = id, "provider has not registered runtime");
                Err(FoundryError::RuntimeNotFound(id.to_string()))
            }
            None => Err(FoundryError::RuntimeNotSupported(id.to_string())),
        }
    }

    /// Unloads every provider. Removals requested during teardown are ignored.
    pub async fn shutdown(&mut self) {
        self.runtimes.unloading = true;
        for mut provider in self.providers.drain(..) {
            if let Err(e) = provider.unload(&mut self.runtimes).await {
                warn!(provider = provider.name(), error = %e, "runtime provider failed to unload");
            }
        }
    }
}
