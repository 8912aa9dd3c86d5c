//! Routing of intercepted simulation entry points.
//!
//! An interception layer can only call plain callbacks, so every redirected
//! entry point carries an opaque [`HookId`]. The [`HookRegistry`] resolves the
//! id to its owning target when the call arrives. Targets are held weakly:
//! once the owner is gone the call falls through to the original.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use pursuit_core::EnvError;
use tracing::debug;

/// Opaque handle of a registered hook target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Native entry points the server redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Called once per frame by the simulation thread.
    FrameUpdate,
    /// Performance-counter frequency query.
    QueryFrequency,
    /// Performance-counter value query.
    QueryCounter,
}

/// Receiver of redirected calls. `original` runs the native behaviour.
pub trait HookTarget: Send + Sync {
    /// One frame update.
    fn on_frame_update(&self, original: &dyn Fn());

    /// Frequency query.
    fn query_frequency(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError>;

    /// Counter query.
    fn query_counter(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError>;
}

/// Table from hook ids to live targets.
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    targets: RwLock<HashMap<HookId, Weak<dyn HookTarget>>>,
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` and return its id.
    pub fn register(&self, target: &Arc<dyn HookTarget>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.targets.write().insert(id, Arc::downgrade(target));
        debug!(?id, "Registered hook target");
        id
    }

    /// Forget `id`. Returns whether it was registered.
    pub fn unregister(&self, id: HookId) -> bool {
        self.targets.write().remove(&id).is_some()
    }

    /// Number of registered ids, live or not.
    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Live target for `id`. The table lock is released before returning.
    pub fn resolve(&self, id: HookId) -> Option<Arc<dyn HookTarget>> {
        self.targets.read().get(&id).and_then(Weak::upgrade)
    }

    /// Route a frame update.
    pub fn dispatch_update(&self, id: HookId, original: &dyn Fn()) {
        match self.resolve(id) {
            Some(target) => target.on_frame_update(original),
            None => original(),
        }
    }

    /// Route a frequency query.
    pub fn dispatch_frequency(
        &self,
        id: HookId,
        original: &dyn Fn() -> i64,
    ) -> Result<i64, EnvError> {
        match self.resolve(id) {
            Some(target) => target.query_frequency(original),
            None => Ok(original()),
        }
    }

    /// Route a counter query.
    pub fn dispatch_counter(
        &self,
        id: HookId,
        original: &dyn Fn() -> i64,
    ) -> Result<i64, EnvError> {
        match self.resolve(id) {
            Some(target) => target.query_counter(original),
            None => Ok(original()),
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("targets", &self.len())
            .finish()
    }
}

/// Capabilities the server needs from the interception layer.
pub trait Interceptor: Send + Sync {
    /// Base address of the simulation module.
    fn module_base(&self) -> usize;

    /// Route `entry` to the target registered as `hook`.
    fn redirect(&self, entry: EntryPoint, hook: HookId) -> Result<(), EnvError>;

    /// Switch every redirection on or off at once.
    fn set_enabled(&self, enabled: bool) -> Result<(), EnvError>;
}

/// Interception layer for simulations running in this process.
///
/// The simulation thread calls [`LocalInterceptor::invoke_update`] and the
/// query methods wherever it would call the native functions.
#[derive(Debug)]
pub struct LocalInterceptor {
    registry: Arc<HookRegistry>,
    module_base: usize,
    redirects: Mutex<HashMap<EntryPoint, HookId>>,
    enabled: AtomicBool,
}

impl LocalInterceptor {
    /// Conventional load address of an executable image.
    pub const DEFAULT_MODULE_BASE: usize = 0x0040_0000;

    /// Interceptor resolving ids through `registry`; starts disabled.
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry,
            module_base: Self::DEFAULT_MODULE_BASE,
            redirects: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(false),
        }
    }

    /// Whether redirections are active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn active_hook(&self, entry: EntryPoint) -> Option<HookId> {
        if !self.is_enabled() {
            return None;
        }
        self.redirects.lock().get(&entry).copied()
    }

    /// Run one frame update, through the hook when redirected.
    pub fn invoke_update(&self, original: &dyn Fn()) {
        match self.active_hook(EntryPoint::FrameUpdate) {
            Some(id) => self.registry.dispatch_update(id, original),
            None => original(),
        }
    }

    /// Query the counter frequency, through the hook when redirected.
    pub fn query_frequency(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
        match self.active_hook(EntryPoint::QueryFrequency) {
            Some(id) => self.registry.dispatch_frequency(id, original),
            None => Ok(original()),
        }
    }

    /// Query the counter value, through the hook when redirected.
    pub fn query_counter(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
        match self.active_hook(EntryPoint::QueryCounter) {
            Some(id) => self.registry.dispatch_counter(id, original),
            None => Ok(original()),
        }
    }
}

impl Interceptor for LocalInterceptor {
    fn module_base(&self) -> usize {
        self.module_base
    }

    fn redirect(&self, entry: EntryPoint, hook: HookId) -> Result<(), EnvError> {
        let mut redirects = self.redirects.lock();
        if let Some(existing) = redirects.get(&entry) {
            return Err(EnvError::Native(format!(
                "{entry:?} is already redirected to {existing:?}"
            )));
        }
        redirects.insert(entry, hook);
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), EnvError> {
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTarget {
        updates: AtomicUsize,
    }

    impl HookTarget for CountingTarget {
        fn on_frame_update(&self, original: &dyn Fn()) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            original();
        }

        fn query_frequency(&self, _original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
            Ok(42)
        }

        fn query_counter(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
            Ok(original() * 2)
        }
    }

    #[test]
    fn registry_routes_calls_to_the_registered_target() {
        let registry = HookRegistry::new();
        let counting = Arc::new(CountingTarget::default());
        let target: Arc<dyn HookTarget> = counting.clone();
        let id = registry.register(&target);

        let originals = AtomicUsize::new(0);
        registry.dispatch_update(id, &|| {
            originals.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counting.updates.load(Ordering::SeqCst), 1);
        assert_eq!(originals.load(Ordering::SeqCst), 1);
        assert_eq!(registry.dispatch_frequency(id, &|| 7).unwrap(), 42);
        assert_eq!(registry.dispatch_counter(id, &|| 7).unwrap(), 14);
    }

    #[test]
    fn dropped_targets_fall_through_to_the_original() {
        let registry = HookRegistry::new();
        let target: Arc<dyn HookTarget> = Arc::new(CountingTarget::default());
        let id = registry.register(&target);
        drop(target);

        assert!(registry.resolve(id).is_none());
        assert_eq!(registry.dispatch_frequency(id, &|| 7).unwrap(), 7);
        assert!(registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn independent_hook_sets_do_not_interfere() {
        let registry = Arc::new(HookRegistry::new());
        let first = Arc::new(CountingTarget::default());
        let second = Arc::new(CountingTarget::default());
        let first_dyn: Arc<dyn HookTarget> = first.clone();
        let second_dyn: Arc<dyn HookTarget> = second.clone();

        let left = LocalInterceptor::new(Arc::clone(&registry));
        let right = LocalInterceptor::new(Arc::clone(&registry));
        left.redirect(EntryPoint::FrameUpdate, registry.register(&first_dyn))
            .unwrap();
        right
            .redirect(EntryPoint::FrameUpdate, registry.register(&second_dyn))
            .unwrap();
        left.set_enabled(true).unwrap();
        right.set_enabled(true).unwrap();

        left.invoke_update(&|| {});
        left.invoke_update(&|| {});
        right.invoke_update(&|| {});
        assert_eq!(first.updates.load(Ordering::SeqCst), 2);
        assert_eq!(second.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interceptor_is_inert_until_enabled() {
        let registry = Arc::new(HookRegistry::new());
        let counting = Arc::new(CountingTarget::default());
        let target: Arc<dyn HookTarget> = counting.clone();
        let interceptor = LocalInterceptor::new(Arc::clone(&registry));
        interceptor
            .redirect(EntryPoint::QueryFrequency, registry.register(&target))
            .unwrap();

        assert_eq!(interceptor.query_frequency(&|| 7).unwrap(), 7);
        interceptor.set_enabled(true).unwrap();
        assert_eq!(interceptor.query_frequency(&|| 7).unwrap(), 42);
        assert_eq!(interceptor.query_counter(&|| 7).unwrap(), 7);
        interceptor.set_enabled(false).unwrap();
        assert_eq!(interceptor.query_frequency(&|| 7).unwrap(), 7);
    }

    #[test]
    fn redirecting_an_entry_twice_fails() {
        let registry = Arc::new(HookRegistry::new());
        let target: Arc<dyn HookTarget> = Arc::new(CountingTarget::default());
        let id = registry.register(&target);
        let interceptor = LocalInterceptor::new(registry);
        interceptor.redirect(EntryPoint::FrameUpdate, id).unwrap();
        assert!(interceptor.redirect(EntryPoint::FrameUpdate, id).is_err());
    }
}
