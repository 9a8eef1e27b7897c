//! A concurrent Treiber stack built on the atomic cell, exercising
//! snapshot-based pop and the copy-form compare-and-swap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use petek::{parallel_for, AtomicShared, Shared};

static SERIAL: Mutex<()> = Mutex::new(());

struct Node<T: Send + Sync + 'static> {
    value: T,
    next: Option<Shared<Node<T>>>,
}

struct Stack<T: Send + Sync + 'static> {
    head: AtomicShared<Node<T>>,
}

impl<T: Send + Sync + Clone + 'static> Stack<T> {
    fn new() -> Self {
        Self {
            head: AtomicShared::null(),
        }
    }

    fn push(&self, value: T) {
        let mut node = Shared::new(Node { value, next: None });
        loop {
            let current = self.head.load();
            Shared::get_mut(&mut node).unwrap().next = current.clone();
            match self.head.compare_exchange(&current, Some(node)) {
                Ok(()) => return,
                Err(rejected) => node = rejected.unwrap(),
            }
        }
    }

    fn pop(&self) -> Option<T> {
        loop {
            let snap = self.head.get_snapshot()?;
            // Holding the snapshot keeps the whole chain alive, so `next`
            // can be handed to the CAS by reference; the cell takes its
            // own unit only on success.
            if self.head.compare_and_swap(&snap, &snap.next) {
                return Some(snap.value.clone());
            }
        }
    }

    fn find(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        // One snapshot protects the traversal: every reachable node owns
        // the next, and the pinned head anchors the chain even while nodes
        // are concurrently popped.
        let snap = match self.head.get_snapshot() {
            Some(snap) => snap,
            None => return false,
        };
        let mut node: &Node<T> = &snap;
        loop {
            if node.value == *value {
                return true;
            }
            match &node.next {
                Some(next) => node = &**next,
                None => return false,
            }
        }
    }
}

#[test]
fn push_pop_serial() {
    let _guard = SERIAL.lock().unwrap();
    let stack = Stack::new();
    assert_eq!(stack.pop(), None);
    stack.push(1);
    stack.push(2);
    assert_eq!(stack.pop(), Some(2));
    assert_eq!(stack.pop(), Some(1));
    assert_eq!(stack.pop(), None);
}

#[test]
#[cfg_attr(miri, ignore)]
fn parallel_push() {
    let _guard = SERIAL.lock().unwrap();
    const N: usize = 100_000;

    let stack = Stack::new();
    parallel_for(N, |i| stack.push(i));

    let mut all = Vec::with_capacity(N);
    while let Some(v) = stack.pop() {
        all.push(v);
    }
    all.sort_unstable();
    assert_eq!(all.len(), N);
    for (i, v) in all.into_iter().enumerate() {
        assert_eq!(i, v);
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn parallel_pop() {
    let _guard = SERIAL.lock().unwrap();
    const N: usize = 100_000;

    let stack = Stack::new();
    for i in 0..N {
        stack.push(i);
    }

    let popped = Mutex::new(Vec::with_capacity(N));
    parallel_for(N, |_| {
        let v = stack.pop().expect("stack emptied early");
        popped.lock().unwrap().push(v);
    });

    let mut all = popped.into_inner().unwrap();
    all.sort_unstable();
    assert_eq!(all.len(), N);
    for (i, v) in all.into_iter().enumerate() {
        assert_eq!(i, v);
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn parallel_pop_push() {
    let _guard = SERIAL.lock().unwrap();

    let stack = Stack::new();
    for i in 0..1000 {
        stack.push(i);
    }

    // Every task pops one and pushes one; the stack oscillates but is
    // never observed empty.
    let empties = AtomicUsize::new(0);
    parallel_for(10_000, |i| {
        if stack.pop().is_none() {
            empties.fetch_add(1, Ordering::Relaxed);
        }
        stack.push(i);
    });
    assert_eq!(empties.load(Ordering::Relaxed), 0);

    let mut count = 0;
    while stack.pop().is_some() {
        count += 1;
    }
    assert_eq!(count, 1000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn find_while_quiet() {
    let _guard = SERIAL.lock().unwrap();
    let stack = Stack::new();
    for i in 0..10_000 {
        stack.push(2 * i);
    }
    parallel_for(10_000, |i| {
        assert_eq!(stack.find(&i), i % 2 == 0);
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn find_under_mutation() {
    let _guard = SERIAL.lock().unwrap();
    let stack = Stack::new();
    for i in 0..20_000 {
        stack.push(2 * i);
    }
    // Pops race the traversals; found answers may go stale but must never
    // touch freed memory.
    parallel_for(10_000, |i| {
        let _ = stack.find(&i);
        stack.pop();
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn no_leaks_after_drain() {
    let _guard = SERIAL.lock().unwrap();

    static NODES: AtomicUsize = AtomicUsize::new(0);
    struct Counted(usize);
    impl Counted {
        fn new(v: usize) -> Self {
            NODES.fetch_add(1, Ordering::Relaxed);
            Counted(v)
        }
    }
    impl Clone for Counted {
        fn clone(&self) -> Self {
            Self::new(self.0)
        }
    }
    impl PartialEq for Counted {
        fn eq(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }
    impl Drop for Counted {
        fn drop(&mut self) {
            NODES.fetch_sub(1, Ordering::Relaxed);
        }
    }

    {
        let stack = Stack::new();
        for i in 0..1000 {
            stack.push(Counted::new(i));
        }
        parallel_for(10_000, |i| {
            let popped = stack.pop();
            assert!(popped.is_some());
            stack.push(Counted::new(i));
        });
        while stack.pop().is_some() {}
    }
    // SAFETY: the lock serializes this file's tests; everything above has
    // been joined and dropped.
    unsafe { petek::drain() };
    assert_eq!(NODES.load(Ordering::Relaxed), 0);
}
