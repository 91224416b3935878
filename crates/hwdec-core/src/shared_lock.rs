//! Reader/writer spin lock over a single atomic counter.
//!
//! ```text
//!   counter  >  0   N readers hold the lock
//!   counter ==  0   free
//!   counter == -1   one writer holds the lock (EXCLUSIVE)
//! ```
//!
//! Hold times are a single CPU-side copy or map, so every wait is a pure
//! spin (`spin_loop` hint, no yield, no syscall).  There is no fairness:
//! a writer can starve while readers keep the counter above zero.

use std::hint;
use std::sync::atomic::{AtomicI32, Ordering};

const EXCLUSIVE: i32 = -1;

/// Anything that exposes the shared/exclusive discipline of [`SharedLock`].
pub trait Lockable: Send + Sync {
    /// Take a shared lock, returning the previous reader count.
    fn read_lock(&self) -> usize;
    /// Drop a shared lock, returning the previous reader count.
    fn unlock_read(&self) -> usize;
    fn write_lock(&self);
    fn unlock_write(&self);
    fn is_write_acquired(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct SharedLock {
    counter: AtomicI32,
}

impl SharedLock {
    pub const fn new() -> Self {
        Self {
            counter: AtomicI32::new(0),
        }
    }

    /// Take a shared lock and return the pre-increment reader count.
    ///
    /// Spins while a writer owns the lock.
    pub fn shared_lock(&self) -> usize {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            if current == EXCLUSIVE {
                hint::spin_loop();
                current = self.counter.load(Ordering::Relaxed);
                continue;
            }
            match self.counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(prev) => return prev as usize,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop a shared lock and return the pre-decrement reader count.
    pub fn unlock_shared(&self) -> usize {
        let prev = self.counter.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "unlock_shared without a shared lock held");
        prev.max(0) as usize
    }

    /// Spin until exclusive access is acquired.
    pub fn lock(&self) {
        while !self.try_lock() {
            hint::spin_loop();
        }
    }

    /// One CAS attempt from free to exclusive.
    pub fn try_lock(&self) -> bool {
        self.counter
            .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.counter.store(0, Ordering::Release);
    }

    pub fn owns(&self) -> bool {
        self.counter.load(Ordering::Acquire) == EXCLUSIVE
    }
}

impl Lockable for SharedLock {
    fn read_lock(&self) -> usize {
        self.shared_lock()
    }

    fn unlock_read(&self) -> usize {
        self.unlock_shared()
    }

    fn write_lock(&self) {
        self.lock();
    }

    fn unlock_write(&self) {
        self.unlock();
    }

    fn is_write_acquired(&self) -> bool {
        self.owns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn create() {
        let lock = SharedLock::new();
        assert!(!lock.owns());
    }

    #[test]
    fn read_single_thread() {
        let lock = SharedLock::new();
        const N: usize = 10;
        for i in 0..N {
            assert_eq!(lock.shared_lock(), i);
        }
        assert!(!lock.owns());
        for i in (1..=N).rev() {
            assert_eq!(lock.unlock_shared(), i);
        }
        assert!(lock.try_lock(), "all readers released");
    }

    #[test]
    fn try_lock_then_unlock() {
        let lock = SharedLock::new();
        assert!(lock.try_lock());
        assert!(lock.owns());
        lock.unlock();
        assert!(!lock.owns());
    }

    #[test]
    fn write_lock() {
        let lock = SharedLock::new();
        lock.lock();
        assert!(lock.owns());
        lock.unlock();
        assert!(!lock.owns());
    }

    #[test]
    fn try_lock_twice_fails() {
        let lock = SharedLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn try_lock_fails_while_reader_holds() {
        let lock = SharedLock::new();
        lock.shared_lock();
        assert!(!lock.try_lock());
        assert!(!lock.owns());
        lock.unlock_shared();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn write_then_try_lock_fails() {
        let lock = SharedLock::new();
        lock.lock();
        assert!(!lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn write_multi_thread_counts_exactly() {
        let lock = Arc::new(SharedLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        const THREADS: usize = 4;
        const ITERS: usize = 10_000;

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        lock.lock();
                        // Non-atomic read-modify-write; only correct under the lock.
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                        lock.unlock();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("writer thread");
        }
        assert_eq!(counter.load(Ordering::Relaxed), THREADS * ITERS);
        assert!(!lock.owns());
    }

    #[test]
    fn readers_never_observe_writer() {
        let lock = Arc::new(SharedLock::new());
        let in_write = Arc::new(AtomicBool::new(false));
        const ITERS: usize = 5_000;

        let writer = {
            let lock = Arc::clone(&lock);
            let in_write = Arc::clone(&in_write);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    lock.lock();
                    in_write.store(true, Ordering::SeqCst);
                    in_write.store(false, Ordering::SeqCst);
                    lock.unlock();
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let in_write = Arc::clone(&in_write);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        lock.shared_lock();
                        assert!(!in_write.load(Ordering::SeqCst), "reader saw writer");
                        assert!(!lock.owns(), "owns() while shared lock held");
                        lock.unlock_shared();
                    }
                })
            })
            .collect();

        writer.join().expect("writer thread");
        for r in readers {
            r.join().expect("reader thread");
        }
        assert!(lock.try_lock());
    }
}
