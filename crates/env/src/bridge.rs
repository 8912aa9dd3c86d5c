//! Hook target gating frame updates and answering time queries.

use std::sync::Arc;

use pursuit_core::EnvError;
use tracing::debug;

use crate::clock::VirtualClock;
use crate::hooks::{EntryPoint, HookId, HookRegistry, HookTarget, Interceptor};
use crate::rendezvous::FrameRendezvous;

/// Connects redirected simulation calls to the rendezvous and the clock.
#[derive(Debug)]
pub struct UpdateBridge {
    rendezvous: Arc<FrameRendezvous>,
}

impl UpdateBridge {
    /// Bridge using `rendezvous` and its clock.
    pub fn new(rendezvous: Arc<FrameRendezvous>) -> Self {
        Self { rendezvous }
    }

    fn clock(&self) -> &VirtualClock {
        self.rendezvous.clock()
    }
}

impl HookTarget for UpdateBridge {
    fn on_frame_update(&self, original: &dyn Fn()) {
        self.rendezvous.run_simulation_frame(original);
    }

    fn query_frequency(&self, _original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
        self.clock().query_frequency()
    }

    fn query_counter(&self, original: &dyn Fn() -> i64) -> Result<i64, EnvError> {
        self.clock().query_counter(original)
    }
}

/// Registration of an [`UpdateBridge`]; unregistered on drop.
pub struct InstalledHooks {
    registry: Arc<HookRegistry>,
    id: HookId,
    _bridge: Arc<dyn HookTarget>,
}

impl Drop for InstalledHooks {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for InstalledHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledHooks").field("id", &self.id).finish()
    }
}

/// Register a bridge for `rendezvous` and redirect the entry points to it.
///
/// Time queries are only redirected when the clock is virtual. Redirections
/// take effect once the caller enables the interceptor.
pub fn install(
    interceptor: &dyn Interceptor,
    registry: &Arc<HookRegistry>,
    rendezvous: Arc<FrameRendezvous>,
) -> Result<InstalledHooks, EnvError> {
    let virtual_time = rendezvous.clock().is_virtual();
    let bridge: Arc<dyn HookTarget> = Arc::new(UpdateBridge::new(rendezvous));
    let id = registry.register(&bridge);
    let installed = InstalledHooks {
        registry: Arc::clone(registry),
        id,
        _bridge: bridge,
    };

    interceptor.redirect(EntryPoint::FrameUpdate, id)?;
    if virtual_time {
        interceptor.redirect(EntryPoint::QueryFrequency, id)?;
        interceptor.redirect(EntryPoint::QueryCounter, id)?;
    }
    debug!(
        module_base = format_args!("{:#x}", interceptor.module_base()),
        virtual_time,
        "Simulation hooks installed"
    );
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::LocalInterceptor;
    use std::time::Duration;

    fn setup(clock: VirtualClock) -> (Arc<HookRegistry>, LocalInterceptor, Arc<FrameRendezvous>) {
        let registry = Arc::new(HookRegistry::new());
        let interceptor = LocalInterceptor::new(Arc::clone(&registry));
        let rendezvous = Arc::new(FrameRendezvous::new(
            Arc::new(clock),
            Duration::from_secs(1),
        ));
        (registry, interceptor, rendezvous)
    }

    #[test]
    fn virtual_clock_answers_the_simulation_time_queries() {
        let (registry, interceptor, rendezvous) = setup(VirtualClock::new_virtual(1_000, 10.0));
        let _hooks = install(&interceptor, &registry, Arc::clone(&rendezvous)).unwrap();
        interceptor.set_enabled(true).unwrap();

        assert_eq!(interceptor.query_frequency(&|| 3_000_000).unwrap(), 1_000);
        assert_eq!(interceptor.query_counter(&|| 10).unwrap(), 10);
        rendezvous.clock().advance_one_tick();
        assert_eq!(interceptor.query_counter(&|| 10).unwrap(), 110);
    }

    #[test]
    fn real_time_mode_leaves_time_queries_alone() {
        let (registry, interceptor, rendezvous) = setup(VirtualClock::real_time());
        let _hooks = install(&interceptor, &registry, rendezvous).unwrap();
        interceptor.set_enabled(true).unwrap();

        assert_eq!(interceptor.query_frequency(&|| 3_000_000).unwrap(), 3_000_000);
        assert_eq!(interceptor.query_counter(&|| 77).unwrap(), 77);
    }

    #[test]
    fn dropping_the_installation_unhooks_updates() {
        let (registry, interceptor, rendezvous) = setup(VirtualClock::new_virtual(1_000, 10.0));
        let hooks = install(&interceptor, &registry, rendezvous).unwrap();
        interceptor.set_enabled(true).unwrap();
        drop(hooks);

        assert!(registry.is_empty());
        let ran = std::sync::atomic::AtomicBool::new(false);
        interceptor.invoke_update(&|| ran.store(true, std::sync::atomic::Ordering::SeqCst));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
