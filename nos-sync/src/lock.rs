//! Sleeping lock with owner tracking
//!
//! Unlike a spinlock, a thread that finds the lock taken is suspended and
//! queued. Release hands ownership directly to the longest waiter, so the
//! woken thread returns from `acquire` already owning the lock.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use spin::Mutex as SpinMutex;

use crate::thread::{KThread, ThreadId, WaitOutcome, WaitTicket};

struct LockState {
    owner: Option<ThreadId>,
    waiters: VecDeque<(KThread, WaitTicket)>,
}

/// A sleeping lock without protected data
///
/// Condition variables attach to a `RawLock`; [`Lock`] wraps one together
/// with the data it guards.
pub struct RawLock {
    state: SpinMutex<LockState>,
}

impl RawLock {
    /// Create a new unlocked lock
    pub const fn new() -> Self {
        Self {
            state: SpinMutex::new(LockState {
                owner: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire the lock, sleeping while another thread holds it.
    ///
    /// Panics if the calling thread already holds it.
    pub fn acquire(&self) {
        let me = KThread::current();
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me.id());
            }
            Some(owner) if owner == me.id() => {
                drop(state);
                panic!("{} re-acquired a lock it already holds", me.name());
            }
            Some(_) => {
                let ticket = me.prepare_wait();
                state.waiters.push_back((me.clone(), ticket));
                drop(state);
                me.block(ticket);
                debug_assert!(self.is_held_by_current_thread());
            }
        }
    }

    /// Release the lock, handing it to the longest waiter if there is one.
    ///
    /// Panics if the calling thread does not hold it.
    pub fn release(&self) {
        let me = KThread::current();
        let mut state = self.state.lock();
        if state.owner != Some(me.id()) {
            drop(state);
            panic!("{} released a lock it does not hold", me.name());
        }
        state.owner = None;
        while let Some((next, ticket)) = state.waiters.pop_front() {
            state.owner = Some(next.id());
            if next.wake(ticket, WaitOutcome::Signaled) {
                return;
            }
            state.owner = None;
        }
    }

    /// Returns true if the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(KThread::current().id())
    }

    /// Returns true if any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

impl Default for RawLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A sleeping lock protecting `T`
pub struct Lock<T> {
    raw: Arc<RawLock>,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `raw`.
unsafe impl<T: Send> Send for Lock<T> {}
unsafe impl<T: Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    /// Create a new lock around `data`
    pub fn new(data: T) -> Self {
        Self {
            raw: Arc::new(RawLock::new()),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock
    pub fn acquire(&self) -> LockGuard<'_, T> {
        self.raw.acquire();
        LockGuard { lock: self }
    }

    /// The underlying raw lock, for attaching condition variables
    pub fn raw(&self) -> &Arc<RawLock> {
        &self.raw
    }

    /// Returns true if the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.raw.is_held_by_current_thread()
    }

    /// Consume the lock and return the inner data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for [`Lock`]
///
/// A condition variable may release and re-acquire the lock while a guard
/// is alive; the guard's thread is suspended for that whole window.
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard's thread owns the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard's thread owns the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}
