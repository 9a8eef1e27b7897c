//! Announcement-based deferred reclamation: acquire, reserve, snapshot
//! protection, retire, and the amortized reconcile pass.
//!
//! A worker reading a cell publishes the pointer it saw in one of its
//! announcement slots and re-reads the cell to validate the announcement.
//! Replacements retire the displaced pointer: the owed decrement is queued
//! and applied later, once no slot in the pool announces that pointer.
//! Unlike hazard pointers, the queue may hold any number of entries for the
//! same pointer; each entry stands for exactly one owed decrement.

use core::hash::BuildHasher;
use core::sync::atomic::{AtomicPtr, Ordering};

use foldhash::fast::FixedState;

use crate::slot::{
    self, engine, BumpFn, SnapshotSlot, WorkerSlots, MAX_WORKERS, RETIRE_DELAY, SNAPSHOT_SLOTS,
    TOTAL_SLOTS,
};

/// One owed decrement: a box pointer and the routine that drops one unit of
/// its count (destroying the box when the unit was the last).
pub(crate) struct Retired {
    pub(crate) ptr: *mut (),
    pub(crate) decrement: unsafe fn(*mut ()),
}

/// RAII token for a validated primary-slot announcement. Clears the slot
/// when dropped.
pub(crate) struct Acquired {
    ptr: *mut (),
    slot: &'static AtomicPtr<()>,
}

impl Acquired {
    #[inline]
    pub(crate) fn ptr(&self) -> *mut () {
        self.ptr
    }
}

impl Drop for Acquired {
    #[inline]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            self.slot.store(core::ptr::null_mut(), Ordering::Release);
        }
    }
}

/// Announcement-stabilized read of `src`.
///
/// Publishes the loaded pointer in the calling worker's primary slot, then
/// re-reads the cell; only when the value is unchanged is the announcement
/// known to have been visible before any replacement could retire the
/// pointer. Without the re-read, a store racing between the load and the
/// publish could free the pointer out from under the reader.
pub(crate) fn acquire(src: &AtomicPtr<()>) -> Acquired {
    let id = slot::worker_id();
    let announce = &engine().worker(id).primary;
    loop {
        let p = src.load(Ordering::SeqCst);
        announce.store(p, Ordering::SeqCst);
        if src.load(Ordering::SeqCst) == p {
            return Acquired { ptr: p, slot: announce };
        }
    }
}

/// Publish `p` in the calling worker's primary slot without validation.
///
/// For callers that already know `p` is live at publication time (for
/// example through a handle they hold a borrow of).
pub(crate) fn reserve(p: *mut ()) -> Acquired {
    let id = slot::worker_id();
    let announce = &engine().worker(id).primary;
    announce.store(p, Ordering::SeqCst);
    Acquired { ptr: p, slot: announce }
}

/// Snapshot-stabilized read of `src`.
///
/// Same validation loop as [`acquire`], but against one of the worker's
/// snapshot slots, which stays occupied for the lifetime of the returned
/// binding rather than for a scope. `bump` is recorded with the slot so a
/// later kick can convert the announcement into an owning claim.
///
/// Returns `None` when the cell holds null.
pub(crate) fn protect_snapshot(
    src: &AtomicPtr<()>,
    bump: BumpFn,
) -> Option<(*mut (), &'static AtomicPtr<()>)> {
    // Empty cells take the fast exit without engaging a slot.
    if src.load(Ordering::SeqCst).is_null() {
        return None;
    }
    let id = slot::worker_id();
    let slots = engine().worker(id);
    let slot = free_snapshot_slot(slots);
    slot.bump.set(Some(bump));
    loop {
        let p = src.load(Ordering::SeqCst);
        slot.announce.store(p, Ordering::SeqCst);
        if src.load(Ordering::SeqCst) == p {
            if p.is_null() {
                // The cell emptied while we were validating. The slot
                // already holds null, so it is free again.
                slot.bump.set(None);
                return None;
            }
            return Some((p, &slot.announce));
        }
    }
}

/// Pick a free snapshot slot, kicking the round-robin victim if all are
/// occupied.
///
/// Kicking converts the victim's announcement into an owning claim: the
/// recorded incrementer adds one unit to the announced box before the slot
/// is reused, so the pointer is never left unprotected. The snapshot bound
/// to the kicked slot observes the changed announcement on drop and applies
/// the matching decrement.
fn free_snapshot_slot(slots: &'static WorkerSlots) -> &'static SnapshotSlot {
    for slot in &slots.snapshots {
        if slot.announce.load(Ordering::Relaxed).is_null() {
            return slot;
        }
    }
    let k = slots.victim.get();
    slots.victim.set((k + 1) % SNAPSHOT_SLOTS);
    let slot = &slots.snapshots[k];
    let kicked = slot.announce.load(Ordering::SeqCst);
    if !kicked.is_null() {
        let bump = slot
            .bump
            .get()
            .expect("occupied snapshot slot without an incrementer");
        // SAFETY: the announcement is validated, so the box is protected
        // from reclamation until the slot changes; bumping keeps it alive
        // past the reuse below.
        unsafe { bump(kicked) };
    }
    slot
}

/// Queue one owed decrement of `ptr` on the calling worker and attempt a
/// reconcile pass.
///
/// During thread teardown, when the worker token is no longer reachable,
/// the entry is leaked; the operating system reclaims it at process exit.
pub(crate) fn retire(ptr: *mut (), decrement: unsafe fn(*mut ())) {
    let id = match slot::try_worker_id() {
        Some(id) => id,
        None => return,
    };
    let slots = engine().worker(id);
    // SAFETY: the deferred queue is only touched by its owning worker.
    unsafe { (*slots.deferred.get()).push(Retired { ptr, decrement }) };
    reconcile(id);
}

/// Apply the calling worker's deferred decrements that no announcement
/// protects.
///
/// Returns immediately below the amortization threshold or when re-entered
/// from a destructor. One pass collects every announcement in the pool into
/// a small chained table; each queued entry either consumes one matching
/// announcement and survives to the next round, or has its decrement
/// applied. Destructors run by the applied decrements may queue further
/// retires; those stay queued for subsequent passes.
pub(crate) fn reconcile(id: usize) {
    let eng = engine();
    let slots = eng.worker(id);
    if slots.reconciling.get() {
        return;
    }
    // SAFETY: owner-only access to the deferred queue.
    if unsafe { (*slots.deferred.get()).len() } < MAX_WORKERS * RETIRE_DELAY {
        return;
    }
    slots.reconciling.set(true);

    // SAFETY: owner-only access; the queue is swapped out so destructors
    // below can push new entries without aliasing this borrow.
    let pending = unsafe { core::mem::take(&mut *slots.deferred.get()) };

    let mut announced = TinyTable::new();
    for other in eng.workers() {
        let p = other.primary.load(Ordering::SeqCst);
        if !p.is_null() {
            announced.insert(p);
        }
        for snap in &other.snapshots {
            let p = snap.announce.load(Ordering::SeqCst);
            if !p.is_null() {
                announced.insert(p);
            }
        }
    }

    let mut kept = Vec::new();
    for entry in pending {
        if announced.remove(entry.ptr) {
            // One announcement protects one owed decrement of this pointer;
            // every further duplicate is safe to apply.
            kept.push(entry);
        } else {
            // SAFETY: the entry owns one count unit and nothing announced
            // the pointer when the table was built; a zero count after this
            // decrement means the box is unreachable.
            unsafe { (entry.decrement)(entry.ptr) };
        }
    }

    // SAFETY: owner-only access. Keep whatever destructors queued in the
    // meantime alongside the survivors.
    unsafe {
        let queue = &mut *slots.deferred.get();
        kept.append(queue);
        *queue = kept;
    }
    slots.reconciling.set(false);
}

/// Whether any announcement slot in the pool currently holds `p`.
pub(crate) fn announced(p: *mut ()) -> bool {
    for slots in engine().workers() {
        if slots.primary.load(Ordering::SeqCst) == p {
            return true;
        }
        for snap in &slots.snapshots {
            if snap.announce.load(Ordering::SeqCst) == p {
                return true;
            }
        }
    }
    false
}

/// Apply every deferred decrement on every worker queue, looping until the
/// queues stay empty.
///
/// Destructors run by the applied decrements may queue further retires
/// (tearing down a long chain of cells enqueues one entry per link); the
/// loop picks those up until nothing is left.
///
/// # Safety
///
/// The pool must be quiescent: no other thread may touch any handle, cell,
/// or snapshot concurrently, and no announcement may be live. Calling this
/// while a reader still holds a validated announcement frees memory out
/// from under it.
pub unsafe fn drain() {
    let eng = engine();
    loop {
        let mut drained = false;
        for slots in eng.workers() {
            // SAFETY: quiescence is the caller's contract, so no worker is
            // touching its own queue concurrently.
            let pending = unsafe { core::mem::take(&mut *slots.deferred.get()) };
            if pending.is_empty() {
                continue;
            }
            drained = true;
            for entry in pending {
                // SAFETY: each entry owns one count unit; with the pool
                // quiescent nothing announces the pointer.
                unsafe { (entry.decrement)(entry.ptr) };
            }
        }
        if !drained {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// TinyTable — chained hash table for the announcement scan
// ---------------------------------------------------------------------------

/// Bucket count: a power of two roughly four times the maximum number of
/// insertions, for short chains.
const TABLE_BUCKETS: usize = (TOTAL_SLOTS * 4).next_power_of_two();

struct Entry {
    value: *mut (),
    next: u16,
}

/// A chaining hash table optimized for a small, bounded number of entries.
/// Allows duplicates. Entries are never unlinked; a consumed entry has its
/// value cleared so later lookups skip it. Chain links are compact indices
/// (1-based, 0 terminates) so the whole table stays cache-friendly.
struct TinyTable {
    entries: Vec<Entry>,
    buckets: Box<[u16]>,
    hasher: FixedState,
}

impl TinyTable {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(TOTAL_SLOTS),
            buckets: vec![0u16; TABLE_BUCKETS].into_boxed_slice(),
            hasher: FixedState::default(),
        }
    }

    #[inline]
    fn bucket(&self, p: *mut ()) -> usize {
        self.hasher.hash_one(p as usize) as usize & (TABLE_BUCKETS - 1)
    }

    /// Insert `p`, duplicates allowed. Requires the table not to be full.
    fn insert(&mut self, p: *mut ()) {
        debug_assert!(self.entries.len() < TOTAL_SLOTS);
        let pos = self.bucket(p);
        self.entries.push(Entry {
            value: p,
            next: self.buckets[pos],
        });
        self.buckets[pos] = self.entries.len() as u16;
    }

    /// Remove one occurrence of `p` if present. If multiple copies exist an
    /// arbitrary one is consumed.
    fn remove(&mut self, p: *mut ()) -> bool {
        let pos = self.bucket(p);
        let mut id = self.buckets[pos];
        while id != 0 {
            let entry = &mut self.entries[id as usize - 1];
            if entry.value == p {
                entry.value = core::ptr::null_mut();
                return true;
            }
            id = entry.next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::TinyTable;

    #[test]
    fn tiny_table_duplicates() {
        let mut table = TinyTable::new();
        let a = 0x1000 as *mut ();
        let b = 0x2000 as *mut ();
        table.insert(a);
        table.insert(a);
        table.insert(b);
        assert!(table.remove(a));
        assert!(table.remove(a));
        assert!(!table.remove(a));
        assert!(table.remove(b));
        assert!(!table.remove(b));
    }

    #[test]
    fn tiny_table_missing() {
        let mut table = TinyTable::new();
        table.insert(0x3000 as *mut ());
        assert!(!table.remove(0x4000 as *mut ()));
    }
}
