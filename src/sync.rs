//! A small blocking mutex whose guard is generic over ownership of the lock
//! (a plain borrow, or an owned `Arc`), ported from the teacher's own
//! `aster_frame::sync::Mutex`.
//!
//! The teacher's version busy-waits on an atomic flag via a custom
//! `WaitQueue`, appropriate for code that may run with interrupts disabled
//! on bare metal. This simulator runs as ordinary OS threads, so the wait
//! primitive here blocks on a [`Condvar`] instead of spinning — the one
//! change from the teacher's version. The guard shape (generic over
//! `R: Deref<Target = Mutex<T>>`, giving both `&Mutex<T>` and `Arc<Mutex<T>>`
//! guards from the same code) is unchanged, which is what lets a
//! [`crate::cursor::Cursor`] hold a chain of locked nodes by `Arc` across
//! its own lifetime instead of being tied to a borrow.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex as StdMutex};

/// A mutex built from a condvar-guarded flag rather than `std::sync::Mutex`
/// directly, so that its guard can be generic over `R` (see module docs).
pub struct Mutex<T: ?Sized> {
    state: StdMutex<bool>,
    condvar: Condvar,
    val: std::cell::UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Self {
            state: StdMutex::new(false),
            condvar: Condvar::new(),
            val: std::cell::UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks the current thread until the mutex is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.acquire_lock();
        MutexGuard_ { mutex: self }
    }

    /// Like [`Self::lock`], but the returned guard owns an `Arc` to the
    /// mutex instead of borrowing it, so it can outlive the current scope.
    pub fn lock_arc(self: &Arc<Self>) -> ArcMutexGuard<T> {
        self.acquire_lock();
        MutexGuard_ {
            mutex: self.clone(),
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_acquire_lock().then(|| MutexGuard_ { mutex: self })
    }

    fn acquire_lock(&self) {
        let mut locked = self.state.lock().unwrap();
        while *locked {
            locked = self.condvar.wait(locked).unwrap();
        }
        *locked = true;
    }

    fn try_acquire_lock(&self) -> bool {
        let mut locked = self.state.lock().unwrap();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn unlock(&self) {
        let mut locked = self.state.lock().unwrap();
        *locked = false;
        drop(locked);
        self.condvar.notify_one();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutex {{ .. }}")
    }
}

#[clippy::has_significant_drop]
pub struct MutexGuard_<T: ?Sized, R: Deref<Target = Mutex<T>>> {
    mutex: R,
}

pub type MutexGuard<'a, T> = MutexGuard_<T, &'a Mutex<T>>;
pub type ArcMutexGuard<T> = MutexGuard_<T, Arc<Mutex<T>>>;

impl<T: ?Sized, R: Deref<Target = Mutex<T>>> Deref for MutexGuard_<T, R> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.val.get() }
    }
}

impl<T: ?Sized, R: Deref<Target = Mutex<T>>> DerefMut for MutexGuard_<T, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.val.get() }
    }
}

impl<T: ?Sized, R: Deref<Target = Mutex<T>>> Drop for MutexGuard_<T, R> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
