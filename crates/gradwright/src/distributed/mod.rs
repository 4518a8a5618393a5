// Distributed — Autograd context registry for cooperating workers
//
// Every distributed backward pass runs inside a context. A worker creates
// the context, remembers which peers took part, and later releases it. The
// registry hands out ids that are unique across all workers:
//
//   bit 63 ........ 48 47 ........................ 0
//       [ worker id  ] [ per-worker sequence number ]
//
// So `id >> 48` is the worker that created the context, and the low 48 bits
// increase by one for each context that worker creates.
//
// COMPONENTS:
//
//   DistAutogradContainer — the registry: one map, one lock, one counter.
//                           `init` configures the process-wide instance;
//                           `new` builds an independent one.
//   DistAutogradContext   — per-pass state shared between threads.
//   DistAutogradConfig    — worker id from code or from the environment.
//
// Each thread also has a "current context" slot per registry, set by
// `new_context` and read by `current_context`.

mod config;
mod container;
mod context;

pub use config::{DistAutogradConfig, WORKER_ID_ENV};
pub use container::DistAutogradContainer;
pub use context::DistAutogradContext;

/// Number of low bits holding the per-worker sequence number.
pub const CONTEXT_ID_BITS: u32 = 48;

/// Largest valid worker id.
pub const MAX_WORKER_ID: i64 = 65535;

/// Mask selecting the sequence number of a context id.
pub const SEQUENCE_MASK: i64 = (1 << CONTEXT_ID_BITS) - 1;

/// The worker id encoded in the high 16 bits of `context_id`.
pub fn worker_id_of(context_id: i64) -> i64 {
    (context_id >> CONTEXT_ID_BITS) & MAX_WORKER_ID
}

/// The sequence number encoded in the low 48 bits of `context_id`.
pub fn sequence_of(context_id: i64) -> i64 {
    context_id & SEQUENCE_MASK
}

/// Smallest id a worker can hand out.
pub(crate) fn first_id(worker_id: i64) -> i64 {
    worker_id << CONTEXT_ID_BITS
}

/// Largest id a worker can hand out.
pub(crate) fn last_id(worker_id: i64) -> i64 {
    first_id(worker_id) | SEQUENCE_MASK
}
