//! Petek: lock-free atomic reference-counted pointers with
//! announcement-based deferred reclamation.
//!
//! Petek provides [`Shared<T>`], an owning reference-counted handle, and
//! [`AtomicShared<T>`], an atomic cell holding at most one such reference,
//! safe to read and replace from any number of threads without locks. A
//! deferred-reclamation engine guarantees that no reader ever dereferences
//! a pointer whose count already dropped to zero, and [`Snapshot<T>`]
//! offers short-lived reads that skip the count entirely.
//!
//! # Key Features
//!
//! - **Lock-Free Progress**: no operation blocks, sleeps, or waits
//! - **Snapshot Reads**: borrowed views with zero count traffic
//! - **Slot-Based Protection**: fixed announcement slots per worker
//! - **Amortized Reclamation**: decrements batched and reconciled lazily
//!
//! # Example
//!
//! ```rust
//! use petek::{AtomicShared, Shared};
//!
//! let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
//!
//! // A full load returns an owning handle that outlives any update.
//! let handle = cell.load().unwrap();
//!
//! // A snapshot is cheaper and pins the value without counting.
//! let snap = cell.get_snapshot().unwrap();
//!
//! cell.store(Some(Shared::new(String::from("Other"))));
//! assert_eq!(*handle, "Hello, World");
//! assert_eq!(*snap, "Hello, World");
//! assert_eq!(*cell.load().unwrap(), "Other");
//! ```
//!
//! # Workers
//!
//! Threads participate as *workers*: each claims a stable id in
//! `[0, num_workers())` on first use and recycles it on exit. The pool
//! width, the number of snapshot slots per worker, and the retirement
//! amortization factor are compile-time constants selected through cargo
//! features (`max-workers-*`, `snapshot-slots-*`, `delay-*`).
//!
//! # Ownership cycles
//!
//! Cells holding owning references can form cycles, which never reach a
//! zero count and therefore leak. There are no weak references; break
//! cycles explicitly (clear one cell) or keep one direction non-owning.

#![warn(missing_docs)]

mod atomic;
mod counted;
mod parallel;
mod reclaim;
mod shared;
mod slot;
mod snapshot;

pub use atomic::{AtomicShared, Expected};
pub use parallel::parallel_for;
pub use reclaim::drain;
pub use shared::Shared;
pub use slot::{num_workers, worker_id};
pub use snapshot::Snapshot;
