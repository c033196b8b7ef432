//! Kernel thread handles
//!
//! A `KThread` names a host thread and carries the wait word used by every
//! blocking primitive in this crate. The word packs a wait sequence number
//! with the reason the current wait ended:
//!
//! ```text
//!   63                               2 1 0
//!  +----------------------------------+---+
//!  |            wait sequence         |why|
//!  +----------------------------------+---+
//! ```
//!
//! A thread opens a wait with [`KThread::prepare_wait`], publishes the
//! returned ticket to whatever queue it sleeps on, and then blocks. Wakers
//! race with a compare-and-swap from "pending" to a reason; exactly one of
//! them wins, and a waker holding the ticket of an older wait always loses.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: KThread = KThread::adopt(std::thread::current());
}

const REASON_BITS: u32 = 2;
const REASON_MASK: u64 = (1 << REASON_BITS) - 1;
const PENDING: u64 = 0;

/// Kernel thread identifier, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Returns the raw identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Why a blocked thread was resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken explicitly (lock hand-off, condition wake)
    Signaled,
    /// Woken by the timer because its deadline passed
    TimedOut,
    /// Woken because its pending timed wait was cancelled
    Cancelled,
}

impl WaitOutcome {
    /// Returns true if the wait ended by deadline expiry.
    pub const fn is_timed_out(self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    const fn code(self) -> u64 {
        match self {
            WaitOutcome::Signaled => 1,
            WaitOutcome::TimedOut => 2,
            WaitOutcome::Cancelled => 3,
        }
    }

    const fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(WaitOutcome::Signaled),
            2 => Some(WaitOutcome::TimedOut),
            3 => Some(WaitOutcome::Cancelled),
            _ => None,
        }
    }
}

/// Identifies one wait of one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitTicket(u64);

struct Inner {
    id: ThreadId,
    name: String,
    host: std::thread::Thread,
    wait: AtomicU64,
}

/// Handle to a kernel thread
#[derive(Clone)]
pub struct KThread {
    inner: Arc<Inner>,
}

impl KThread {
    fn adopt(host: std::thread::Thread) -> Self {
        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        let name = host
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("kthread-{}", id.0));
        Self {
            inner: Arc::new(Inner {
                id,
                name,
                host,
                wait: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the handle of the calling thread.
    pub fn current() -> KThread {
        CURRENT.with(KThread::clone)
    }

    /// Spawns a named kernel thread.
    pub fn spawn<F, T>(name: &str, f: F) -> std::io::Result<std::thread::JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        std::thread::Builder::new().name(name.to_string()).spawn(f)
    }

    /// Returns this thread's identifier.
    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Returns this thread's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true if this handle names the calling thread.
    pub fn is_current(&self) -> bool {
        self.inner.host.id() == std::thread::current().id()
    }

    /// Opens a new wait. Must be called by the thread itself before it is
    /// published on any wait queue.
    pub(crate) fn prepare_wait(&self) -> WaitTicket {
        assert!(self.is_current(), "{} prepared a wait for another thread", self.name());
        let seq = (self.inner.wait.load(Ordering::Acquire) >> REASON_BITS) + 1;
        self.inner.wait.store(seq << REASON_BITS, Ordering::Release);
        WaitTicket(seq)
    }

    /// Ends the wait identified by `ticket` and makes the thread runnable.
    ///
    /// Returns false if that wait already ended, or if the thread has moved
    /// on to a later wait.
    pub(crate) fn wake(&self, ticket: WaitTicket, outcome: WaitOutcome) -> bool {
        let pending = (ticket.0 << REASON_BITS) | PENDING;
        let woken = (ticket.0 << REASON_BITS) | outcome.code();
        match self
            .inner
            .wait
            .compare_exchange(pending, woken, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.inner.host.unpark();
                true
            }
            Err(_) => false,
        }
    }

    /// Suspends the calling thread until the wait identified by `ticket`
    /// ends, and reports why it ended.
    pub(crate) fn block(&self, ticket: WaitTicket) -> WaitOutcome {
        assert!(self.is_current(), "{} blocked on behalf of another thread", self.name());
        loop {
            let word = self.inner.wait.load(Ordering::Acquire);
            debug_assert_eq!(word >> REASON_BITS, ticket.0);
            if let Some(outcome) = WaitOutcome::from_code(word & REASON_MASK) {
                return outcome;
            }
            // park() may return spuriously; the wait word is the only truth.
            std::thread::park();
        }
    }
}

impl PartialEq for KThread {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for KThread {}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KThread")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = KThread::current();
        let b = KThread::current();
        assert_eq!(a, b);
        assert!(a.is_current());

        let other = KThread::spawn("other", KThread::current)
            .unwrap()
            .join()
            .unwrap();
        assert_ne!(a.id(), other.id());
        assert_eq!(other.name(), "other");
        assert!(!other.is_current());
    }

    #[test]
    fn test_wake_before_block_is_not_lost() {
        let me = KThread::current();
        let ticket = me.prepare_wait();
        assert!(me.wake(ticket, WaitOutcome::Signaled));
        assert_eq!(me.block(ticket), WaitOutcome::Signaled);
    }

    #[test]
    fn test_only_first_waker_wins() {
        let me = KThread::current();
        let ticket = me.prepare_wait();
        assert!(me.wake(ticket, WaitOutcome::TimedOut));
        assert!(!me.wake(ticket, WaitOutcome::Signaled));
        assert_eq!(me.block(ticket), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_stale_ticket_cannot_wake_later_wait() {
        let me = KThread::current();
        let old = me.prepare_wait();
        assert!(me.wake(old, WaitOutcome::Signaled));
        me.block(old);

        let new = me.prepare_wait();
        assert!(!me.wake(old, WaitOutcome::Signaled));
        assert!(me.wake(new, WaitOutcome::Cancelled));
        assert_eq!(me.block(new), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_block_until_woken_from_other_thread() {
        let (tx, rx) = mpsc::channel();
        let sleeper = KThread::spawn("sleeper", move || {
            let me = KThread::current();
            let ticket = me.prepare_wait();
            tx.send((me.clone(), ticket)).unwrap();
            me.block(ticket)
        })
        .unwrap();

        let (thread, ticket) = rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(thread.wake(ticket, WaitOutcome::Signaled));
        assert_eq!(sleeper.join().unwrap(), WaitOutcome::Signaled);
    }
}
