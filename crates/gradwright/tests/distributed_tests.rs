// Distributed autograd context tests — id allocation, per-thread current
// context, release/retrieve, re-initialization.
//
// Only `test_process_wide_registry` configures the process-wide instance;
// every other test builds its own registry so tests can run in parallel.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use gradwright::distributed::{
    sequence_of, worker_id_of, DistAutogradConfig, DistAutogradContainer,
};
use gradwright::Error;

fn registry(worker_id: i64) -> DistAutogradContainer {
    let container = DistAutogradContainer::new();
    container.initialize(worker_id).unwrap();
    container
}

#[test]
fn test_process_wide_registry() {
    let container = DistAutogradContainer::init(3).unwrap();
    assert!(DistAutogradContainer::get_instance().is_ok());
    assert_eq!(container.worker_id(), 3);

    let first = container.new_context().unwrap();
    let second = container.new_context().unwrap();
    assert_eq!(first.context_id(), 3 << 48);
    assert_eq!(second.context_id(), (3 << 48) | 1);

    let current = container.current_context().unwrap();
    assert_eq!(current.context_id(), second.context_id());

    container.release_context(first.context_id()).unwrap();
    let err = container.retrieve_context(first.context_id()).unwrap_err();
    assert!(matches!(err, Error::UnknownContext(id) if id == 3 << 48), "{err}");

    // same instance through every entry point
    let cfg = DistAutogradConfig::default().with_worker_id(3);
    let again = DistAutogradContainer::init_from_config(&cfg).unwrap();
    assert!(std::ptr::eq(container, again));
    container.release_context(second.context_id()).unwrap();
}

#[test]
fn test_first_ids() {
    let c = registry(3);
    assert_eq!(c.new_context().unwrap().context_id(), 3 << 48);
    assert_eq!(c.new_context().unwrap().context_id(), (3 << 48) | 1);
    assert_eq!(c.current_context().unwrap().context_id(), (3 << 48) | 1);
}

#[test]
fn test_release_then_retrieve_fails() {
    let c = registry(3);
    let first = c.new_context().unwrap().context_id();
    let second = c.new_context().unwrap().context_id();

    c.release_context(first).unwrap();
    assert!(matches!(
        c.retrieve_context(first),
        Err(Error::UnknownContext(id)) if id == first
    ));
    // the current context was the second one and is untouched
    assert_eq!(c.current_context_id(), Some(second));
    assert!(c.retrieve_context(second).is_ok());

    c.release_context(second).unwrap();
    assert!(!c.has_valid_context());
    assert!(matches!(c.current_context(), Err(Error::NoCurrentContext)));
    assert!(matches!(c.release_context(second), Err(Error::UnknownContext(_))));
}

#[test]
fn test_reinit_keeps_old_contexts() {
    let c = registry(3);
    let old: Vec<i64> = (0..2).map(|_| c.new_context().unwrap().context_id()).collect();

    c.initialize(5).unwrap();
    assert_eq!(c.worker_id(), 5);
    assert_eq!(c.new_context().unwrap().context_id(), 5 << 48);

    for id in old {
        let ctx = c.retrieve_context(id).unwrap();
        assert_eq!(worker_id_of(ctx.context_id()), 3);
    }
    assert_eq!(c.num_contexts(), 3);
}

#[test]
fn test_retrieve_does_not_change_current() {
    let c = registry(1);
    let a = c.new_context().unwrap().context_id();
    let b = c.new_context().unwrap().context_id();
    c.retrieve_context(a).unwrap();
    assert_eq!(c.current_context_id(), Some(b));
}

#[test]
fn test_not_initialized() {
    let c = DistAutogradContainer::new();
    assert!(matches!(c.new_context(), Err(Error::NotInitialized)));
    assert!(matches!(c.current_context(), Err(Error::NoCurrentContext)));
}

#[test]
fn test_worker_id_out_of_range() {
    let c = DistAutogradContainer::new();
    assert!(matches!(c.initialize(65536), Err(Error::WorkerIdOutOfRange(65536))));
    assert!(matches!(c.initialize(-3), Err(Error::WorkerIdOutOfRange(-3))));
    let cfg = DistAutogradConfig::default().with_worker_id(70000);
    assert!(matches!(
        DistAutogradContainer::init_from_config(&cfg),
        Err(Error::WorkerIdOutOfRange(70000))
    ));
}

// Threads

#[test]
fn test_current_context_is_per_thread() {
    let c = Arc::new(registry(7));
    let mine = c.new_context().unwrap().context_id();

    let theirs = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            assert!(!c.has_valid_context());
            let id = c.new_context().unwrap().context_id();
            assert_eq!(c.current_context().unwrap().context_id(), id);
            id
        })
        .join()
        .unwrap()
    };

    assert_ne!(mine, theirs);
    assert_eq!(c.current_context().unwrap().context_id(), mine);
    // contexts themselves are shared
    assert_eq!(c.retrieve_context(theirs).unwrap().context_id(), theirs);
}

#[test]
fn test_release_from_other_thread_leaves_slot() {
    let c = Arc::new(registry(2));
    let id = c.new_context().unwrap().context_id();

    {
        let c = Arc::clone(&c);
        thread::spawn(move || c.release_context(id).unwrap())
            .join()
            .unwrap();
    }

    // the creating thread still points at the released id
    assert!(c.has_valid_context());
    assert!(matches!(
        c.current_context(),
        Err(Error::MissingContextData(missing)) if missing == id
    ));
}

#[test]
fn test_joining_a_context_from_another_thread() {
    let c = Arc::new(registry(4));
    let ctx = c.new_context().unwrap();
    let id = ctx.context_id();

    let c2 = Arc::clone(&c);
    thread::spawn(move || {
        c2.set_current_context_id(id);
        c2.current_context().unwrap().add_known_worker_id(9);
    })
    .join()
    .unwrap();

    assert_eq!(ctx.known_worker_ids(), HashSet::from([9]));
}

#[test]
fn test_concurrent_ids_are_unique() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let c = Arc::new(registry(11));
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let c = Arc::clone(&c);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let ids: Vec<i64> = (0..PER_THREAD)
                    .map(|_| c.new_context().unwrap().context_id())
                    .collect();
                // increasing within one thread
                assert!(ids.windows(2).all(|w| w[0] < w[1]));
                ids
            })
        })
        .collect();

    let mut all = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert_eq!(worker_id_of(id), 11);
            assert!(all.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(c.num_contexts(), THREADS * PER_THREAD);
    let max_seq = all.iter().map(|&id| sequence_of(id)).max().unwrap();
    assert_eq!(max_seq, (THREADS * PER_THREAD - 1) as i64);
}

#[test]
fn test_concurrent_release() {
    let c = Arc::new(registry(6));
    let ids: Vec<i64> = (0..64).map(|_| c.new_context().unwrap().context_id()).collect();

    let handles: Vec<_> = ids
        .chunks(16)
        .map(|chunk| {
            let c = Arc::clone(&c);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for id in chunk {
                    c.release_context(id).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(c.num_contexts(), 0);
}
