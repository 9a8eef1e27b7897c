//! Per-worker slot blocks and global engine state.
//!
//! Each worker owns one primary announcement slot, a small fixed set of
//! snapshot announcement slots, and a deferred-decrement queue. The global
//! state is a fixed-width array of these blocks plus a worker-id allocator.
//! Announcement slots are written only by their owning worker and read by
//! everyone; queues are touched only by their owner (and by the quiescent
//! drain).

use core::cell::{Cell, UnsafeCell};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_utils::CachePadded;
use once_cell::race::OnceBox;

use crate::reclaim::Retired;

// Maximum concurrent workers. Configurable via cargo features:
//   petek = { features = ["max-workers-512"] }
// Default: 128.
#[cfg(feature = "max-workers-1024")]
pub(crate) const MAX_WORKERS: usize = 1024;
#[cfg(all(feature = "max-workers-512", not(feature = "max-workers-1024")))]
pub(crate) const MAX_WORKERS: usize = 512;
#[cfg(all(
    feature = "max-workers-256",
    not(any(feature = "max-workers-512", feature = "max-workers-1024"))
))]
pub(crate) const MAX_WORKERS: usize = 256;
#[cfg(not(any(
    feature = "max-workers-256",
    feature = "max-workers-512",
    feature = "max-workers-1024"
)))]
pub(crate) const MAX_WORKERS: usize = 128;

// Snapshot announcement slots per worker. When all are occupied the next
// snapshot kicks one, converting it into an owning reference.
#[cfg(feature = "snapshot-slots-8")]
pub(crate) const SNAPSHOT_SLOTS: usize = 8;
#[cfg(all(feature = "snapshot-slots-4", not(feature = "snapshot-slots-8")))]
pub(crate) const SNAPSHOT_SLOTS: usize = 4;
#[cfg(not(any(feature = "snapshot-slots-4", feature = "snapshot-slots-8")))]
pub(crate) const SNAPSHOT_SLOTS: usize = 3;

// Retirement amortization factor: a worker buffers up to
// MAX_WORKERS * RETIRE_DELAY deferred decrements before reconciling them
// against the announcement slots.
#[cfg(feature = "delay-10")]
pub(crate) const RETIRE_DELAY: usize = 10;
#[cfg(all(feature = "delay-2", not(feature = "delay-10")))]
pub(crate) const RETIRE_DELAY: usize = 2;
#[cfg(not(any(feature = "delay-2", feature = "delay-10")))]
pub(crate) const RETIRE_DELAY: usize = 5;

/// Announcement slots across the whole pool (primary + snapshot, per worker).
pub(crate) const TOTAL_SLOTS: usize = MAX_WORKERS * (SNAPSHOT_SLOTS + 1);

/// Routine that adds one count unit to a type-erased box pointer.
pub(crate) type BumpFn = unsafe fn(*mut ());

/// One snapshot announcement slot.
///
/// `bump` records, for the currently announced pointer, the routine that
/// converts the announcement into an owning claim. It is written by the
/// owning worker together with the pointer and only ever invoked by the
/// owning worker when the slot is kicked.
pub(crate) struct SnapshotSlot {
    pub(crate) announce: AtomicPtr<()>,
    pub(crate) bump: Cell<Option<BumpFn>>,
}

impl SnapshotSlot {
    fn new() -> Self {
        Self {
            announce: AtomicPtr::new(core::ptr::null_mut()),
            bump: Cell::new(None),
        }
    }
}

/// Per-worker slot block.
pub(crate) struct WorkerSlots {
    /// Primary announcement slot: stabilized reads and reservations.
    pub(crate) primary: AtomicPtr<()>,
    /// Snapshot announcement slots.
    pub(crate) snapshots: [SnapshotSlot; SNAPSHOT_SLOTS],
    /// Round-robin victim index for kicking. Owner-only.
    pub(crate) victim: Cell<usize>,
    /// Decrements owed by this worker, applied once nothing announces them.
    pub(crate) deferred: UnsafeCell<Vec<Retired>>,
    /// Set while this worker is reconciling its queue, so that destructors
    /// retiring further pointers do not re-enter. Owner-only.
    pub(crate) reconciling: Cell<bool>,
}

impl WorkerSlots {
    fn new() -> Self {
        Self {
            primary: AtomicPtr::new(core::ptr::null_mut()),
            snapshots: core::array::from_fn(|_| SnapshotSlot::new()),
            victim: Cell::new(0),
            deferred: UnsafeCell::new(Vec::new()),
            reconciling: Cell::new(false),
        }
    }
}

// SAFETY: the atomic slots are freely shared. The Cell and UnsafeCell
// fields are mutated only by the worker the block belongs to (worker ids
// are unique per live thread), or by drain() under its quiescence
// contract, so no two threads ever touch them concurrently.
unsafe impl Sync for WorkerSlots {}
// SAFETY: raw pointers in the deferred queue refer to heap boxes whose
// values are Send + Sync (enforced where entries are created).
unsafe impl Send for WorkerSlots {}

/// Global engine state: the slot blocks and the worker-id allocator.
pub(crate) struct EngineState {
    slots: Box<[CachePadded<WorkerSlots>]>,
    /// Next never-used worker id.
    next_id: AtomicUsize,
    /// Recycled worker ids. Cold path: taken once per thread.
    free_ids: Mutex<Vec<usize>>,
}

impl EngineState {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_WORKERS);
        for _ in 0..MAX_WORKERS {
            slots.push(CachePadded::new(WorkerSlots::new()));
        }
        Self {
            slots: slots.into_boxed_slice(),
            next_id: AtomicUsize::new(0),
            free_ids: Mutex::new(Vec::new()),
        }
    }

    /// Slot block of worker `id`.
    #[inline]
    pub(crate) fn worker(&self, id: usize) -> &WorkerSlots {
        &self.slots[id]
    }

    /// Iterate every worker's slot block.
    #[inline]
    pub(crate) fn workers(&self) -> impl Iterator<Item = &WorkerSlots> + '_ {
        self.slots.iter().map(|padded| &**padded)
    }

    /// Allocate a worker id, recycling released ones first.
    pub(crate) fn claim_worker(&self) -> usize {
        if let Some(id) = self.free_ids.lock().expect("worker id lock poisoned").pop() {
            return id;
        }
        // CAS loop: only increment on success so the counter stays valid
        // if the assert unwinds.
        loop {
            let current = self.next_id.load(Ordering::Relaxed);
            assert!(
                current < MAX_WORKERS,
                "petek: exceeded maximum worker count ({MAX_WORKERS})"
            );
            match self.next_id.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(_) => continue,
            }
        }
    }

    /// Release a worker id for recycling. Clears the announcement slots;
    /// any decrements still queued are adopted by the next thread that
    /// claims this id (or by a final drain).
    pub(crate) fn release_worker(&self, id: usize) {
        let slots = self.worker(id);
        slots.primary.store(core::ptr::null_mut(), Ordering::SeqCst);
        for slot in &slots.snapshots {
            slot.announce.store(core::ptr::null_mut(), Ordering::SeqCst);
            slot.bump.set(None);
        }
        slots.victim.set(0);
        slots.reconciling.set(false);
        self.free_ids
            .lock()
            .expect("worker id lock poisoned")
            .push(id);
    }
}

/// Global singleton instance.
static ENGINE: OnceBox<EngineState> = OnceBox::new();

/// Get a reference to the global engine state.
#[inline]
pub(crate) fn engine() -> &'static EngineState {
    ENGINE.get_or_init(|| Box::new(EngineState::new()))
}

/// Thread-local worker token. Lazily claims an id on first use and
/// releases it for recycling when the thread exits.
struct WorkerToken {
    id: Cell<Option<usize>>,
}

impl Drop for WorkerToken {
    fn drop(&mut self) {
        if let Some(id) = self.id.get() {
            engine().release_worker(id);
        }
    }
}

thread_local! {
    static WORKER: WorkerToken = const {
        WorkerToken {
            id: Cell::new(None),
        }
    };
}

/// The fixed width of the worker pool.
///
/// Worker ids handed out by [`worker_id`] always lie in
/// `[0, num_workers())`. The width is a compile-time constant, selectable
/// through the `max-workers-*` cargo features.
#[inline]
pub fn num_workers() -> usize {
    MAX_WORKERS
}

/// A stable index for the calling thread, unique among live threads.
///
/// The id is claimed lazily on first use and recycled when the thread
/// exits. Panics if more than [`num_workers`] threads participate at once.
#[inline]
pub fn worker_id() -> usize {
    WORKER.with(|token| match token.id.get() {
        Some(id) => id,
        None => {
            let id = engine().claim_worker();
            token.id.set(Some(id));
            id
        }
    })
}

/// Like [`worker_id`], but returns `None` during thread teardown when the
/// thread-local token is no longer accessible.
#[inline]
pub(crate) fn try_worker_id() -> Option<usize> {
    WORKER
        .try_with(|token| match token.id.get() {
            Some(id) => id,
            None => {
                let id = engine().claim_worker();
                token.id.set(Some(id));
                id
            }
        })
        .ok()
}
