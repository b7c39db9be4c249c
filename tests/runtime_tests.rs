use async_trait::async_trait;
use ide_build::runtime::{ItemsChanged, RuntimeKind};
use ide_build::{FoundryError, Runtime, RuntimeManager, RuntimeProvider, RuntimeRegistry};
use std::cell::RefCell;
use std::rc::Rc;

fn container(id: &str) -> Rc<Runtime> {
    Rc::new(Runtime::new(
        format!("fake:{}", id),
        "Fake",
        RuntimeKind::Host,
    ))
}

/// Adds the runtimes it was given on load and removes them on unload.
struct FakeProvider {
    name: &'static str,
    runtimes: Vec<Rc<Runtime>>,
    fail: bool,
    unloads: Rc<RefCell<usize>>,
}

impl FakeProvider {
    fn new(name: &'static str, runtimes: Vec<Rc<Runtime>>) -> Self {
        Self {
            name,
            runtimes,
            fail: false,
            unloads: Rc::new(RefCell::new(0)),
        }
    }
}

#[async_trait(?Send)]
impl RuntimeProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn provides(&self, runtime_id: &str) -> bool {
        runtime_id.starts_with("fake:")
    }

    async fn load(&mut self, runtimes: &mut RuntimeRegistry) -> ide_build::Result<()> {
        if self.fail {
            return Err(FoundryError::ProviderBusy(self.name.to_string()));
        }
        for runtime in &self.runtimes {
            runtimes.add(Rc::clone(runtime));
        }
        Ok(())
    }

    async fn unload(&mut self, runtimes: &mut RuntimeRegistry) -> ide_build::Result<()> {
        *self.unloads.borrow_mut() += 1;
        for runtime in &self.runtimes {
            runtimes.remove(runtime);
        }
        Ok(())
    }
}

fn record_changes(registry: &mut RuntimeRegistry) -> Rc<RefCell<Vec<ItemsChanged>>> {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    registry.connect_items_changed(move |change| sink.borrow_mut().push(*change));
    changes
}

#[test]
fn test_registry_is_seeded_with_host() {
    let registry = RuntimeRegistry::new();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(0).unwrap().id(), "host");
    assert!(registry.get_by_id("host").is_some());
}

#[test]
fn test_add_then_get_by_id_returns_same_runtime() {
    let mut registry = RuntimeRegistry::new();
    let changes = record_changes(&mut registry);
    let runtime = container("a");

    registry.add(Rc::clone(&runtime));

    let found = registry.get_by_id("fake:a").unwrap();
    assert!(Rc::ptr_eq(&found, &runtime));
    assert_eq!(
        changes.borrow().as_slice(),
        &[ItemsChanged {
            position: 1,
            removed: 0,
            added: 1
        }]
    );
}

#[test]
fn test_remove_unknown_runtime_is_a_no_op() {
    let mut registry = RuntimeRegistry::new();
    let changes = record_changes(&mut registry);

    // Same id as the host runtime, but a different instance.
    let impostor = Rc::new(Runtime::host());
    assert!(!registry.remove(&impostor));

    assert_eq!(registry.len(), 1);
    assert!(changes.borrow().is_empty());
}

#[test]
fn test_remove_notifies_position() {
    let mut registry = RuntimeRegistry::new();
    let a = container("a");
    let b = container("b");
    registry.add(Rc::clone(&a));
    registry.add(Rc::clone(&b));
    let changes = record_changes(&mut registry);

    assert!(registry.remove(&a));

    let ids: Vec<_> = registry.iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, vec!["host", "fake:b"]);
    assert_eq!(
        changes.borrow().as_slice(),
        &[ItemsChanged {
            position: 1,
            removed: 1,
            added: 0
        }]
    );
}

#[test]
fn test_disconnected_observer_is_not_called() {
    let mut registry = RuntimeRegistry::new();
    let calls = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&calls);
    let id = registry.connect_items_changed(move |_| *sink.borrow_mut() += 1);

    registry.add(container("a"));
    registry.disconnect(id);
    registry.add(container("b"));

    assert_eq!(*calls.borrow(), 1);
}

#[tokio::test]
async fn test_manager_with_zero_providers_has_host() {
    let manager = RuntimeManager::new(Vec::new()).await;
    assert_eq!(manager.runtimes().len(), 1);
    assert_eq!(manager.ensure("host").unwrap().id(), "host");
}

#[tokio::test]
async fn test_manager_loads_providers_in_order() {
    let manager = RuntimeManager::new(vec![
        Box::new(FakeProvider::new("one", vec![container("a")])),
        Box::new(FakeProvider::new("two", vec![container("b"), container("c")])),
    ])
    .await;

    let ids: Vec<_> = manager.runtimes().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, vec!["host", "fake:a", "fake:b", "fake:c"]);
    assert_eq!(manager.providers().collect::<Vec<_>>(), vec!["one", "two"]);
}

#[tokio::test]
async fn test_ensure_distinguishes_unsupported_from_missing() {
    let manager =
        RuntimeManager::new(vec![Box::new(FakeProvider::new("fake", vec![container("a")]))]).await;

    assert!(manager.ensure("fake:a").is_ok());

    let err = manager.ensure("fake:zzz").unwrap_err();
    assert!(matches!(err, FoundryError::RuntimeNotFound(_)));

    let err = manager.ensure("flatpak:org.gnome.Sdk").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to locate provider for runtime: flatpak:org.gnome.Sdk"
    );
}

#[tokio::test]
async fn test_failed_provider_stays_registered() {
    let mut failing = FakeProvider::new("failing", vec![container("a")]);
    failing.fail = true;
    let unloads = Rc::clone(&failing.unloads);

    let mut manager = RuntimeManager::new(vec![Box::new(failing)]).await;
    assert_eq!(manager.runtimes().len(), 1);
    assert_eq!(manager.providers().count(), 1);

    manager.shutdown().await;
    assert_eq!(*unloads.borrow(), 1);
}

#[tokio::test]
async fn test_register_and_unregister_provider() {
    let mut manager = RuntimeManager::new(Vec::new()).await;
    let provider = FakeProvider::new("late", vec![container("x")]);
    let unloads = Rc::clone(&provider.unloads);

    manager.register_provider(Box::new(provider)).await.unwrap();
    assert!(manager.get_runtime("fake:x").is_some());

    assert!(manager.unregister_provider("late").await.unwrap());
    assert!(manager.get_runtime("fake:x").is_none());
    assert_eq!(*unloads.borrow(), 1);
    assert!(!manager.unregister_provider("late").await.unwrap());
}

#[tokio::test]
async fn test_shutdown_ignores_removals() {
    let mut manager =
        RuntimeManager::new(vec![Box::new(FakeProvider::new("fake", vec![container("a")]))]).await;
    assert_eq!(manager.runtimes().len(), 2);

    manager.shutdown().await;

    assert_eq!(manager.runtimes().len(), 2);
    assert_eq!(manager.providers().count(), 0);
}
