//! Process-wide packet buffer pool.
//!
//! Modeled as an explicit resource rather than a global: callers `init` it
//! once at process startup and `shutdown` it on exit. Acquiring a buffer
//! from an uninitialized or exhausted pool falls back to a heap allocation
//! rather than blocking, since pool exhaustion is a throughput hint, not a
//! correctness boundary.

use crossbeam_queue::ArrayQueue;
use std::sync::OnceLock;

/// Size of each pooled buffer, matching the maximum adaptive chunk size.
pub const SLOT_SIZE: usize = crate::congestion::CHUNK_SIZE_MAX as usize;

static POOL: OnceLock<ArrayQueue<Vec<u8>>> = OnceLock::new();

/// Initializes the process-wide pool with `slots` pre-allocated buffers.
///
/// Calling this more than once is a no-op after the first call.
pub fn init(slots: usize) {
    let _ = POOL.set(ArrayQueue::new(slots));
    if let Some(pool) = POOL.get() {
        while !pool.is_full() {
            if pool.push(vec![0u8; SLOT_SIZE]).is_err() {
                break;
            }
        }
    }
}

/// Tears down the pool, dropping all currently-idle buffers.
///
/// Buffers already checked out via [`acquire`] are unaffected; they are
/// simply not returned to a pool on [`release`] after shutdown.
pub fn shutdown() {
    if let Some(pool) = POOL.get() {
        while pool.pop().is_some() {}
    }
}

/// Acquires a buffer, reusing a pooled one if available or allocating fresh.
#[must_use]
pub fn acquire() -> Vec<u8> {
    match POOL.get().and_then(ArrayQueue::pop) {
        Some(mut buf) => {
            buf.clear();
            buf
        }
        None => Vec::with_capacity(SLOT_SIZE),
    }
}

/// Returns a buffer to the pool. Silently dropped if the pool is full,
/// uninitialized, or was shut down.
pub fn release(buf: Vec<u8>) {
    if let Some(pool) = POOL.get() {
        let _ = pool.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both tests share the process-wide pool, so they run against whichever
    // state the other left behind; neither asserts on pool occupancy itself.

    #[test]
    fn acquire_without_init_allocates_fresh() {
        let buf = acquire();
        release(buf);
    }

    #[test]
    fn init_then_acquire_reuses_pooled_buffer() {
        init(2);
        let a = acquire();
        let b = acquire();
        release(a);
        release(b);
    }
}
