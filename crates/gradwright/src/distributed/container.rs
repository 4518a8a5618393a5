use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use gradwright_core::{Error, Result};

use super::config::DistAutogradConfig;
use super::context::DistAutogradContext;
use super::{first_id, last_id, MAX_WORKER_ID};

static INSTANCE: OnceLock<DistAutogradContainer> = OnceLock::new();
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // registry id -> this thread's current context id in that registry
    static CURRENT_CONTEXT_ID: RefCell<HashMap<u64, i64>> = RefCell::new(HashMap::new());
}

struct State {
    worker_id: i64,
    next_context_id: i64,
    max_id: i64,
    contexts: HashMap<i64, Arc<DistAutogradContext>>,
}

/// Registry of live [`DistAutogradContext`]s.
///
/// All map accesses go through one mutex and never run user code while
/// holding it. The "current context" is tracked per thread and per registry,
/// so two registries in one process do not see each other's slots.
///
/// Dropping a registry clears the dropping thread's slot only. Other threads
/// that used it keep one stale `(registry, id)` entry each until they exit.
///
/// Most programs use the process-wide instance:
///
/// ```no_run
/// use gradwright::distributed::DistAutogradContainer;
///
/// let container = DistAutogradContainer::init(3)?;
/// let ctx = container.new_context()?;
/// assert_eq!(ctx.context_id(), 3 << 48);
/// container.release_context(ctx.context_id())?;
/// # Ok::<(), gradwright::Error>(())
/// ```
pub struct DistAutogradContainer {
    registry_id: u64,
    initialized: AtomicBool,
    state: Mutex<State>,
}

impl Default for DistAutogradContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DistAutogradContainer {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread exit
        let _ = CURRENT_CONTEXT_ID.try_with(|slots| {
            slots.borrow_mut().remove(&self.registry_id);
        });
    }
}

impl std::fmt::Debug for DistAutogradContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("DistAutogradContainer")
            .field("initialized", &self.is_initialized())
            .field("worker_id", &state.worker_id)
            .field("next_context_id", &state.next_context_id)
            .field("num_contexts", &state.contexts.len())
            .finish()
    }
}

impl DistAutogradContainer {
    /// An uninitialized registry, independent of the process-wide one.
    pub fn new() -> Self {
        DistAutogradContainer {
            registry_id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            initialized: AtomicBool::new(false),
            state: Mutex::new(State {
                worker_id: 0,
                next_context_id: 0,
                max_id: 0,
                contexts: HashMap::new(),
            }),
        }
    }

    /// Configure the process-wide registry for `worker_id` and return it.
    ///
    /// Calling it again switches to the new worker id and restarts the
    /// counter at `worker_id << 48`. Contexts created before stay
    /// registered under their old ids.
    pub fn init(worker_id: i64) -> Result<&'static DistAutogradContainer> {
        let container = INSTANCE.get_or_init(DistAutogradContainer::new);
        container.initialize(worker_id)?;
        Ok(container)
    }

    /// [`init`](Self::init) with the worker id taken from `config`.
    pub fn init_from_config(config: &DistAutogradConfig) -> Result<&'static DistAutogradContainer> {
        Self::init(config.worker_id)
    }

    /// The process-wide registry. Fails until [`init`](Self::init) ran.
    pub fn get_instance() -> Result<&'static DistAutogradContainer> {
        match INSTANCE.get() {
            Some(container) if container.is_initialized() => Ok(container),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Configure this registry for `worker_id`. Same rules as
    /// [`init`](Self::init).
    pub fn initialize(&self, worker_id: i64) -> Result<()> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(Error::WorkerIdOutOfRange(worker_id));
        }
        let mut state = self.lock_state();
        if self.is_initialized() && !state.contexts.is_empty() {
            log::warn!(
                "re-initializing distributed autograd (worker {} -> {}) with {} live contexts",
                state.worker_id,
                worker_id,
                state.contexts.len()
            );
        }
        state.worker_id = worker_id;
        state.next_context_id = first_id(worker_id);
        state.max_id = last_id(worker_id);
        self.initialized.store(true, Ordering::Release);
        log::debug!("distributed autograd initialized for worker {worker_id}");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The configured worker id.
    pub fn worker_id(&self) -> i64 {
        self.lock_state().worker_id
    }

    /// Largest id this worker can hand out.
    pub fn max_id(&self) -> i64 {
        self.lock_state().max_id
    }

    /// Number of registered contexts.
    pub fn num_contexts(&self) -> usize {
        self.lock_state().contexts.len()
    }

    /// Create a context, register it, and make it current for this thread.
    pub fn new_context(&self) -> Result<Arc<DistAutogradContext>> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let mut state = self.lock_state();
        let context_id = state.next_context_id;
        if context_id == i64::MAX || context_id > state.max_id {
            return Err(Error::ContextIdsExhausted {
                worker_id: state.worker_id,
            });
        }
        let context = Arc::new(DistAutogradContext::new(context_id));
        state.contexts.insert(context_id, Arc::clone(&context));
        self.set_current_context_id(context_id);
        state.next_context_id += 1;
        drop(state);

        log::debug!("created distributed autograd context {context_id}");
        Ok(context)
    }

    /// Whether this thread has a current context in this registry.
    pub fn has_valid_context(&self) -> bool {
        self.current_context_id().is_some()
    }

    /// The context this thread is working in.
    pub fn current_context(&self) -> Result<Arc<DistAutogradContext>> {
        let context_id = self.current_context_id().ok_or(Error::NoCurrentContext)?;
        self.lock_state()
            .contexts
            .get(&context_id)
            .cloned()
            .ok_or(Error::MissingContextData(context_id))
    }

    /// Remove `context_id` from the registry. This thread's current slot is
    /// cleared if it pointed at that context; other threads are untouched.
    pub fn release_context(&self, context_id: i64) -> Result<()> {
        let mut state = self.lock_state();
        if state.contexts.remove(&context_id).is_none() {
            return Err(Error::UnknownContext(context_id));
        }
        self.clear_current_context_if(context_id);
        drop(state);

        log::debug!("released distributed autograd context {context_id}");
        Ok(())
    }

    /// Like [`release_context`](Self::release_context) but a missing id is
    /// not an error. Returns whether something was released.
    pub fn release_context_if_present(&self, context_id: i64) -> bool {
        let mut state = self.lock_state();
        if state.contexts.remove(&context_id).is_none() {
            return false;
        }
        self.clear_current_context_if(context_id);
        drop(state);

        log::debug!("released distributed autograd context {context_id}");
        true
    }

    /// Look up a registered context. Does not change the current context.
    pub fn retrieve_context(&self, context_id: i64) -> Result<Arc<DistAutogradContext>> {
        self.lock_state()
            .contexts
            .get(&context_id)
            .cloned()
            .ok_or(Error::UnknownContext(context_id))
    }

    /// This thread's current context id, if any.
    pub fn current_context_id(&self) -> Option<i64> {
        CURRENT_CONTEXT_ID.with(|slots| slots.borrow().get(&self.registry_id).copied())
    }

    /// Make `context_id` current for this thread, e.g. when joining a pass
    /// started by another thread. The id is not checked against the map.
    pub fn set_current_context_id(&self, context_id: i64) {
        CURRENT_CONTEXT_ID.with(|slots| {
            slots.borrow_mut().insert(self.registry_id, context_id);
        });
    }

    /// Forget this thread's current context.
    pub fn clear_current_context(&self) {
        CURRENT_CONTEXT_ID.with(|slots| {
            slots.borrow_mut().remove(&self.registry_id);
        });
    }

    fn clear_current_context_if(&self, context_id: i64) {
        if self.current_context_id() == Some(context_id) {
            self.clear_current_context();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{sequence_of, worker_id_of};

    fn registry(worker_id: i64) -> DistAutogradContainer {
        let c = DistAutogradContainer::new();
        c.initialize(worker_id).unwrap();
        c
    }

    #[test]
    fn test_uninitialized() {
        let c = DistAutogradContainer::new();
        assert!(!c.is_initialized());
        assert!(matches!(c.new_context(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_worker_id_range() {
        let c = DistAutogradContainer::new();
        assert!(matches!(c.initialize(-1), Err(Error::WorkerIdOutOfRange(-1))));
        assert!(matches!(
            c.initialize(65536),
            Err(Error::WorkerIdOutOfRange(65536))
        ));
        assert!(!c.is_initialized());
        c.initialize(65535).unwrap();
        c.initialize(0).unwrap();
    }

    #[test]
    fn test_ids_are_namespaced_and_increasing() {
        let c = registry(9);
        let ids: Vec<i64> = (0..5).map(|_| c.new_context().unwrap().context_id()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(worker_id_of(*id), 9);
            assert_eq!(sequence_of(*id), i as i64);
        }
        assert_eq!(c.num_contexts(), 5);
        assert_eq!(c.current_context_id(), Some(ids[4]));
    }

    #[test]
    fn test_exhaustion() {
        let c = registry(2);
        let max_id = c.max_id();
        c.lock_state().next_context_id = max_id;
        let last = c.new_context().unwrap();
        assert_eq!(last.context_id(), c.max_id());
        assert!(matches!(
            c.new_context(),
            Err(Error::ContextIdsExhausted { worker_id: 2 })
        ));
    }

    #[test]
    fn test_exhaustion_at_i64_max() {
        let c = registry(32767);
        assert_eq!(c.max_id(), i64::MAX);
        c.lock_state().next_context_id = i64::MAX;
        assert!(matches!(
            c.new_context(),
            Err(Error::ContextIdsExhausted { .. })
        ));
    }

    #[test]
    fn test_slots_scoped_per_registry() {
        let a = registry(1);
        let b = registry(1);
        let ctx = a.new_context().unwrap();
        assert!(a.has_valid_context());
        assert!(!b.has_valid_context());
        assert!(matches!(b.current_context(), Err(Error::NoCurrentContext)));
        assert!(matches!(
            b.retrieve_context(ctx.context_id()),
            Err(Error::UnknownContext(_))
        ));
    }

    #[test]
    fn test_dangling_slot_reports_missing_data() {
        let c = registry(4);
        c.set_current_context_id(12345);
        assert!(c.has_valid_context());
        assert!(matches!(
            c.current_context(),
            Err(Error::MissingContextData(12345))
        ));
        c.clear_current_context();
        assert!(!c.has_valid_context());
    }

    fn slot_count() -> usize {
        CURRENT_CONTEXT_ID.with(|slots| slots.borrow().len())
    }

    #[test]
    fn test_drop_clears_this_threads_slot() {
        let before = slot_count();
        let c = registry(8);
        c.new_context().unwrap();
        assert_eq!(slot_count(), before + 1);
        drop(c);
        assert_eq!(slot_count(), before);
    }

    #[test]
    fn test_release_if_present() {
        let c = registry(0);
        let id = c.new_context().unwrap().context_id();
        assert!(c.release_context_if_present(id));
        assert!(!c.release_context_if_present(id));
        assert!(!c.has_valid_context());
        assert!(matches!(c.release_context(id), Err(Error::UnknownContext(_))));
    }
}
