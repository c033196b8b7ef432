//! NOS Sync
//!
//! Blocking synchronization for kernel threads: a sleeping lock with owner
//! tracking, a tick timer, the timed-wait queue (`Alarm`), condition
//! variables with an optional timeout, and a tagged rendezvous.
//!
//! Every kernel thread is a host thread. Blocking suspends only the calling
//! thread; wakers make it runnable again through a per-wait ticket so that a
//! wait is resumed at most once, whoever gets there first.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alarm;
pub mod condition;
pub mod lock;
pub mod rendezvous;
pub mod thread;
pub mod timer;

pub use alarm::Alarm;
pub use condition::Condition;
pub use lock::{Lock, LockGuard, RawLock};
pub use rendezvous::Rendezvous;
pub use thread::{KThread, ThreadId, WaitOutcome};
pub use timer::{Timer, TimerDriver, DEFAULT_TICKS_PER_INTERRUPT};
