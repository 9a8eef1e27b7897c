//! Single-threaded behavior of handles, cells, and snapshots.

use petek::{AtomicShared, Shared};

#[test]
fn construction() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    let handle = cell.load().unwrap();
    assert_eq!(*handle, "Hello, World");
    assert!(handle.use_count() >= 2);
}

#[test]
fn store() {
    let cell = AtomicShared::null();
    cell.store(Some(Shared::new(String::from("Hello, World"))));
    let handle = cell.load().unwrap();
    assert_eq!(*handle, "Hello, World");
    assert!(handle.use_count() >= 2);
}

#[test]
fn store_null() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    cell.store(None);
    assert!(cell.load().is_none());
}

#[test]
fn store_load_many() {
    let cell = AtomicShared::null();
    for i in 0..10000 {
        let s = format!("Hello, string #{i}");
        cell.store(Some(Shared::new(s.clone())));
        let handle = cell.load().unwrap();
        assert_eq!(*handle, s);
    }
    assert_eq!(*cell.load().unwrap(), "Hello, string #9999");
}

#[test]
fn load_is_independent_of_cell() {
    let cell = AtomicShared::new(Some(Shared::new(42)));
    let handle = cell.load().unwrap();
    cell.store(None);
    assert_eq!(*handle, 42);
}

#[test]
fn keep_many_copies() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    let mut handles: Vec<Shared<String>> = Vec::new();

    for i in 0..1000 {
        if i % 100 == 0 {
            handles.clear();
        } else if i % 10 == 0 {
            cell.store(Some(Shared::new(format!("Hello, string #{i}"))));
        } else {
            handles.push(cell.load().unwrap());
            for handle in &handles {
                assert!(!handle.is_empty());
            }
        }
    }
}

#[test]
fn exchange() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    let old = cell.exchange(Some(Shared::new(String::from("A second string"))));
    assert_eq!(*old.unwrap(), "Hello, World");
    assert_eq!(*cell.load().unwrap(), "A second string");

    let old = cell.exchange(None);
    assert_eq!(*old.unwrap(), "A second string");
    assert!(cell.load().is_none());
}

#[test]
fn swap_preserves_counts() {
    let cell = AtomicShared::new(Some(Shared::new(1)));
    let mut handle = Some(Shared::new(2));
    let outside = handle.clone();

    cell.swap(&mut handle);
    assert_eq!(**handle.as_ref().unwrap(), 1);
    assert_eq!(*cell.load().unwrap(), 2);
    // The swapped-in value kept its original units: the outside clone plus
    // the cell's.
    assert!(outside.as_ref().unwrap().use_count() >= 2);

    // Swapping with an empty handle empties the cell.
    let mut empty = None;
    cell.swap(&mut empty);
    assert_eq!(*empty.unwrap(), 2);
    assert!(cell.load().is_none());
}

#[test]
fn snapshot_across_store() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    let snap = cell.get_snapshot().unwrap();
    cell.store(Some(Shared::new(String::from("Other"))));
    assert_eq!(*snap, "Hello, World");
    assert_eq!(*cell.load().unwrap(), "Other");
}

#[test]
fn snapshot_of_empty_cell() {
    let cell: AtomicShared<i32> = AtomicShared::null();
    assert!(cell.get_snapshot().is_none());
}

#[test]
fn snapshot_takes_no_count() {
    let cell = AtomicShared::new(Some(Shared::new(5)));
    let before = cell.load().unwrap().use_count();
    let snap = cell.get_snapshot().unwrap();
    assert_eq!(snap.use_count(), before - 1);
    drop(snap);
}

#[test]
fn get_snapshot_many() {
    // More live snapshots than a worker has slots, forcing kicks.
    let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    let mut snapshots = Vec::new();

    for i in 0..1000 {
        if i % 100 == 0 {
            snapshots.clear();
        } else if i % 10 == 0 {
            cell.store(Some(Shared::new(format!("Hello, string #{i}"))));
        } else {
            snapshots.push(cell.get_snapshot().unwrap());
            for snap in &snapshots {
                assert!(!snap.is_empty());
            }
        }
    }
}

#[test]
fn kicked_snapshot_stays_valid() {
    let cell = AtomicShared::new(Some(Shared::new(String::from("pinned"))));
    let first = cell.get_snapshot().unwrap();

    // Exhaust every snapshot slot several times over so `first` is kicked
    // to a count-holding state.
    let other = AtomicShared::new(Some(Shared::new(String::from("churn"))));
    let mut churn = Vec::new();
    for _ in 0..32 {
        churn.push(other.get_snapshot().unwrap());
    }

    cell.store(Some(Shared::new(String::from("replaced"))));
    assert_eq!(*first, "pinned");
    drop(churn);
    drop(first);
}

#[test]
fn moved_handle_leaves_none() {
    let mut slot = Some(Shared::new(9));
    let taken = slot.take();
    assert!(slot.is_none());
    assert_eq!(*taken.unwrap(), 9);
    // Dropping an empty handle is a no-op.
    drop(slot);
}

#[test]
fn ptr_identity() {
    let a = Shared::new(String::from("same"));
    let b = a.clone();
    let c = Shared::new(String::from("same"));
    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&c));
    assert_eq!(*a, *c);

    let cell = AtomicShared::new(Some(a.clone()));
    let loaded = cell.load().unwrap();
    assert!(loaded.ptr_eq(&a));
    let snap = cell.get_snapshot().unwrap();
    assert_eq!(snap.as_ptr(), a.as_ptr());
}

#[test]
fn get_mut_requires_exclusivity() {
    let mut handle = Shared::new(vec![1, 2]);
    Shared::get_mut(&mut handle).unwrap().push(3);
    assert_eq!(*handle, vec![1, 2, 3]);

    let cell = AtomicShared::new(Some(handle.clone()));
    assert!(Shared::get_mut(&mut handle).is_none());
    drop(cell);
}

#[test]
fn use_count_tracks_handles() {
    let a = Shared::new(0u64);
    assert_eq!(a.use_count(), 1);
    let b = a.clone();
    assert_eq!(a.use_count(), 2);
    drop(b);
    assert_eq!(a.use_count(), 1);
}
