//! Timed-wait queue
//!
//! Threads park here until a deadline measured on the kernel [`Timer`].
//! The alarm registers itself as a timer interrupt handler; every interrupt
//! makes each thread whose deadline has passed runnable, exactly once, and
//! then yields the interrupted thread.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use nos_api::{Tick, nos_trace};
use spin::Mutex as SpinMutex;

use crate::thread::{KThread, ThreadId, WaitOutcome, WaitTicket};
use crate::timer::Timer;

#[derive(Clone)]
struct Entry {
    thread: KThread,
    ticket: WaitTicket,
    deadline: Tick,
}

/// Timed-wait queue driven by timer interrupts
pub struct Alarm {
    timer: Arc<Timer>,
    pending: SpinMutex<HashMap<ThreadId, Entry>>,
}

impl Alarm {
    /// Create an alarm and install it as an interrupt handler of `timer`.
    pub fn new(timer: &Arc<Timer>) -> Arc<Self> {
        let alarm = Arc::new(Self {
            timer: Arc::clone(timer),
            pending: SpinMutex::new(HashMap::new()),
        });
        let handler: Weak<Alarm> = Arc::downgrade(&alarm);
        timer.set_interrupt_handler(move || {
            if let Some(alarm) = handler.upgrade() {
                alarm.timer_interrupt();
            }
        });
        alarm
    }

    /// The timer this alarm measures deadlines on
    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    /// Suspend the calling thread for at least `ticks` ticks.
    ///
    /// Returns immediately with [`WaitOutcome::TimedOut`] if `ticks <= 0`.
    /// The thread is made runnable by the first interrupt at which the clock
    /// has reached the deadline, or earlier by [`Alarm::cancel`], in which
    /// case [`WaitOutcome::Cancelled`] is returned.
    pub fn wait_until(&self, ticks: i64) -> WaitOutcome {
        if ticks <= 0 {
            return WaitOutcome::TimedOut;
        }
        let me = KThread::current();
        let ticket = me.prepare_wait();
        self.register(&me, ticket, ticks);
        me.block(ticket)
    }

    /// Remove the pending wait of `thread` and make it runnable.
    ///
    /// Returns true if a wait was pending and this call ended it.
    pub fn cancel(&self, thread: &KThread) -> bool {
        let entry = self.pending.lock().remove(&thread.id());
        match entry {
            Some(entry) => {
                let woken = entry.thread.wake(entry.ticket, WaitOutcome::Cancelled);
                nos_trace!("alarm: cancelled wait of {} (woken: {})", thread.name(), woken);
                woken
            }
            None => false,
        }
    }

    /// Number of threads with a pending deadline
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if `thread` has a pending deadline.
    pub fn is_pending(&self, thread: &KThread) -> bool {
        self.pending.lock().contains_key(&thread.id())
    }

    /// Timer interrupt handler: wake every thread whose deadline has passed.
    pub fn timer_interrupt(&self) {
        let now = self.timer.now();
        let mut expired = Vec::new();
        self.pending.lock().retain(|_, entry| {
            if entry.deadline <= now {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        for entry in expired {
            // A thread already woken by someone else is left alone.
            if entry.thread.wake(entry.ticket, WaitOutcome::TimedOut) {
                nos_trace!("alarm: {} timed out at tick {}", entry.thread.name(), now);
            }
        }
        std::thread::yield_now();
    }

    /// Record a deadline `ticks` from now for the wait `ticket` of `thread`.
    pub(crate) fn register(&self, thread: &KThread, ticket: WaitTicket, ticks: i64) {
        let deadline = self.timer.now().saturating_add(ticks.unsigned_abs());
        self.pending.lock().insert(
            thread.id(),
            Entry {
                thread: thread.clone(),
                ticket,
                deadline,
            },
        );
    }

    /// Drop the deadline of `thread` if it still belongs to the wait
    /// `ticket`, without waking anyone.
    pub(crate) fn withdraw(&self, thread: &KThread, ticket: WaitTicket) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&thread.id()) {
            Some(entry) if entry.ticket == ticket => {
                pending.remove(&thread.id());
                true
            }
            _ => false,
        }
    }
}
