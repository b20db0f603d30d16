use std::sync::atomic::{AtomicU64, Ordering};

/// Optimistically claims the next index of a shared counter.
///
/// Loads the current value as the candidate and asks `has_room` whether it
/// may be taken. If not, the counter is reloaded and the new candidate asked
/// again; `has_room` may pause before returning `false`. Otherwise the
/// compare-and-swap moves `index` from `candidate` to `candidate + 1`, and a
/// failure (another claimer got there first) also restarts from a fresh
/// load.
///
/// Every successful call returns a distinct index, and indices are handed out
/// in increasing order.
#[inline(always)]
pub fn claim_index(index: &AtomicU64, mut has_room: impl FnMut(u64) -> bool) -> u64 {
    let mut candidate = index.load(Ordering::Relaxed);
    loop {
        if !has_room(candidate) {
            candidate = index.load(Ordering::Relaxed);
            continue;
        }
        match index.compare_exchange_weak(
            candidate,
            candidate.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(current) => candidate = current,
        }
    }
}

/// Returns `true` when a ring of `capacity` slots has no free slot for
/// `write_idx` given the last known `read_idx`.
///
/// A candidate behind `read_idx` is stale (other claimers moved past it
/// while the consumer drained) and is never full: the claim fails its
/// compare-and-swap and retries with a fresh index.
#[inline(always)]
pub fn is_full(read_idx: u64, write_idx: u64, capacity: u64) -> bool {
    write_idx
        .checked_sub(read_idx)
        .is_some_and(|used| used >= capacity)
}
