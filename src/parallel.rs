//! A minimal parallel-for over scoped OS threads, used by the tests and
//! benchmarks to drive the concurrent types from many workers at once.

use std::thread;

/// Run `f(i)` for every `i` in `0..n`, spread over the available
/// parallelism in contiguous chunks.
///
/// Blocks until every call has returned. `f` runs concurrently from
/// several threads, so it must be `Sync`; iteration order within and
/// across chunks is unspecified.
///
/// # Examples
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let sum = AtomicUsize::new(0);
/// petek::parallel_for(100, |i| {
///     sum.fetch_add(i, Ordering::Relaxed);
/// });
/// assert_eq!(sum.load(Ordering::Relaxed), 4950);
/// ```
pub fn parallel_for<F>(n: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    if n == 0 {
        return;
    }
    let threads = thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .min(n);
    let chunk = n.div_ceil(threads);
    let f = &f;
    thread::scope(|scope| {
        for t in 0..threads {
            let start = t * chunk;
            let end = ((t + 1) * chunk).min(n);
            if start >= end {
                break;
            }
            scope.spawn(move || {
                for i in start..end {
                    f(i);
                }
            });
        }
    });
}
