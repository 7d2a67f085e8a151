//! C9 (ambient): the atfork handler registry.
//!
//! A process-global, append-only set of `prepare`/`parent`/`child`
//! handles, installed via `pthread_atfork` exactly once. Grounded on
//! `original_source/lib/namespaces.py::Toolbox.ForkHandlers` /
//! `register_fork_handler` / `pthread_atfork`, restructured per distilled
//! spec §9's design note: no dynamic-attribute trick, just an explicit
//! registry behind a `Once`-guarded install.

use std::sync::{Mutex, Once, OnceLock};

/// A registered fork handler. Function pointers (not closures) so
/// unregistration can compare by identity, matching the spec's "by exact
/// handle identity" requirement.
pub type Handler = fn();

#[derive(Default)]
struct Registry {
    prepare: Vec<Handler>,
    parent: Vec<Handler>,
    child: Vec<Handler>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
static INSTALL: Once = Once::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

/// Register handlers to run around every future `fork()` in this process.
/// Any of the three may be `None`. Idempotent registration of the
/// underlying `pthread_atfork` trampoline; registering the same handler
/// twice appends it twice (matching `append_fork_handler`'s list
/// semantics — callers that want idempotence should check before
/// registering).
pub fn register(prepare: Option<Handler>, parent: Option<Handler>, child: Option<Handler>) {
    {
        let mut reg = registry().lock().expect("atfork registry poisoned");
        if let Some(h) = prepare {
            reg.prepare.push(h);
        }
        if let Some(h) = parent {
            reg.parent.push(h);
        }
        if let Some(h) = child {
            reg.child.push(h);
        }
    }
    install_trampoline();
}

/// Remove a previously registered handler by exact function-pointer
/// identity from all three lists.
pub fn unregister(handler: Handler) {
    let mut reg = registry().lock().expect("atfork registry poisoned");
    reg.prepare.retain(|h| *h as usize != handler as usize);
    reg.parent.retain(|h| *h as usize != handler as usize);
    reg.child.retain(|h| *h as usize != handler as usize);
}

fn install_trampoline() {
    INSTALL.call_once(|| {
        // SAFETY: the three trampolines are valid extern "C" function
        // pointers with the signature pthread_atfork(3) expects (no
        // arguments, no return value); they only ever touch the
        // process-global registry, which is safe to call from any thread
        // at fork time.
        unsafe {
            libc::pthread_atfork(
                Some(run_prepare_handlers),
                Some(run_parent_handlers),
                Some(run_child_handlers),
            );
        }
    });
}

extern "C" fn run_prepare_handlers() {
    run_all(|r| &r.prepare);
}

extern "C" fn run_parent_handlers() {
    run_all(|r| &r.parent);
}

extern "C" fn run_child_handlers() {
    run_all(|r| &r.child);
}

fn run_all(select: impl Fn(&Registry) -> &Vec<Handler>) {
    // A poisoned mutex at fork time would otherwise abort every future
    // fork in the process; skip silently rather than propagate a panic
    // out of a pthread_atfork trampoline.
    if let Ok(reg) = registry().lock() {
        for handler in select(&reg) {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn register_and_unregister_round_trip() {
        register(Some(bump), None, None);
        {
            let reg = registry().lock().unwrap();
            assert!(reg.prepare.contains(&(bump as Handler)));
        }
        unregister(bump);
        let reg = registry().lock().unwrap();
        assert!(!reg.prepare.contains(&(bump as Handler)));
    }
}
