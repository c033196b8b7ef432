//! Condition variables
//!
//! A `Condition` is tied to one [`RawLock`]. Every operation requires the
//! calling thread to hold that lock; calling without it is a kernel bug and
//! panics.
//!
//! `sleep_for` registers the same wait with the condition's queue and with
//! the [`Alarm`]. Whichever wakes the thread first wins the wait ticket; a
//! wake always withdraws the alarm deadline of the thread it resumed, and a
//! thread resumed by its deadline removes itself from the queue before
//! re-taking the lock, so no thread is resumed twice.

use std::collections::VecDeque;
use std::sync::Arc;

use nos_api::nos_trace;
use spin::Mutex as SpinMutex;

use crate::alarm::Alarm;
use crate::lock::{Lock, RawLock};
use crate::thread::{KThread, WaitOutcome, WaitTicket};

/// Condition variable with optional timeout
pub struct Condition {
    lock: Arc<RawLock>,
    alarm: Arc<Alarm>,
    waiters: SpinMutex<VecDeque<(KThread, WaitTicket)>>,
}

impl Condition {
    /// Create a condition variable attached to `lock`.
    pub fn new<T>(lock: &Lock<T>, alarm: Arc<Alarm>) -> Self {
        Self::with_raw(Arc::clone(lock.raw()), alarm)
    }

    /// Create a condition variable attached to a raw lock.
    pub fn with_raw(lock: Arc<RawLock>, alarm: Arc<Alarm>) -> Self {
        Self {
            lock,
            alarm,
            waiters: SpinMutex::new(VecDeque::new()),
        }
    }

    /// Atomically release the lock and sleep until woken, then re-acquire
    /// the lock.
    pub fn sleep(&self) {
        self.assert_held("sleep");
        let me = KThread::current();
        let ticket = me.prepare_wait();
        self.waiters.lock().push_back((me.clone(), ticket));

        self.lock.release();
        me.block(ticket);
        self.lock.acquire();
    }

    /// Like [`Condition::sleep`], but also resumes once `timeout` ticks have
    /// elapsed.
    ///
    /// Returns [`WaitOutcome::Signaled`] if woken by [`Condition::wake`],
    /// otherwise the outcome of the timed wait. A non-positive timeout
    /// returns [`WaitOutcome::TimedOut`] without releasing the lock.
    pub fn sleep_for(&self, timeout: i64) -> WaitOutcome {
        self.assert_held("sleep_for");
        if timeout <= 0 {
            return WaitOutcome::TimedOut;
        }
        let me = KThread::current();
        let ticket = me.prepare_wait();
        self.waiters.lock().push_back((me.clone(), ticket));
        self.alarm.register(&me, ticket, timeout);

        self.lock.release();
        let outcome = me.block(ticket);
        if outcome != WaitOutcome::Signaled {
            self.waiters
                .lock()
                .retain(|(thread, waiting)| !(thread == &me && *waiting == ticket));
        }
        self.alarm.withdraw(&me, ticket);
        nos_trace!("condition: {} resumed from sleep_for ({:?})", me.name(), outcome);
        self.lock.acquire();
        outcome
    }

    /// Wake the longest-waiting thread, if any.
    ///
    /// Returns true if a thread was resumed.
    pub fn wake(&self) -> bool {
        self.assert_held("wake");
        loop {
            let next = self.waiters.lock().pop_front();
            let Some((thread, ticket)) = next else {
                return false;
            };
            // A waiter whose deadline already fired is on its way out.
            if thread.wake(ticket, WaitOutcome::Signaled) {
                self.alarm.withdraw(&thread, ticket);
                return true;
            }
        }
    }

    /// Wake every waiting thread.
    pub fn wake_all(&self) {
        self.assert_held("wake_all");
        while self.wake() {}
    }

    /// Number of threads queued on this condition
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    fn assert_held(&self, op: &str) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition {op} without holding its lock"
        );
    }
}
