// Grad mode — Thread-local switch for recording differentiable history
//
// When grad mode is off, custom functions still run forward but their
// outputs are not linked into the graph. `Function::apply` turns it off
// around the user's forward body so nothing inside forward is tracked.
// The flag is per thread; a guard restores the previous value on drop, so
// nested scopes and early returns through `?` behave.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns true if differentiable history is recorded on this thread.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

/// Set grad mode for this thread.
pub fn set_grad_enabled(enabled: bool) {
    GRAD_ENABLED.with(|g| g.set(enabled));
}

/// RAII guard that sets grad mode and restores the previous value on drop.
#[must_use = "grad mode is restored as soon as the guard is dropped"]
pub struct GradModeGuard {
    prev: bool,
}

impl GradModeGuard {
    pub fn new(enabled: bool) -> Self {
        let prev = is_grad_enabled();
        set_grad_enabled(enabled);
        GradModeGuard { prev }
    }
}

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Run `f` with grad mode disabled.
pub fn no_grad<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = GradModeGuard::new(false);
    f()
}
