use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use super::{sequence_of, worker_id_of};

/// State of one distributed backward pass.
///
/// Shared through `Arc` between the registry and every thread working on
/// the pass; the registry entry is dropped on release, the handles survive
/// until their owners let go.
#[derive(Debug)]
pub struct DistAutogradContext {
    context_id: i64,
    known_worker_ids: Mutex<HashSet<i64>>,
}

impl DistAutogradContext {
    pub(crate) fn new(context_id: i64) -> Self {
        DistAutogradContext {
            context_id,
            known_worker_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn context_id(&self) -> i64 {
        self.context_id
    }

    /// The worker that created this context.
    pub fn creator_worker_id(&self) -> i64 {
        worker_id_of(self.context_id)
    }

    pub fn sequence(&self) -> i64 {
        sequence_of(self.context_id)
    }

    /// Record that `worker_id` took part in this pass.
    pub fn add_known_worker_id(&self, worker_id: i64) {
        self.known_worker_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker_id);
    }

    /// Workers that took part in this pass so far.
    pub fn known_worker_ids(&self) -> HashSet<i64> {
        self.known_worker_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_known_workers_shared_across_threads() {
        let ctx = Arc::new(DistAutogradContext::new((7 << 48) | 2));
        assert_eq!(ctx.creator_worker_id(), 7);
        assert_eq!(ctx.sequence(), 2);

        let handles: Vec<_> = (0..4)
            .map(|w| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.add_known_worker_id(w))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        ctx.add_known_worker_id(1);
        assert_eq!(ctx.known_worker_ids(), (0..4).collect());
    }
}
