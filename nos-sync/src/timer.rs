//! Tick timer
//!
//! The timer owns the kernel clock. Each interrupt advances the clock by a
//! fixed number of ticks and runs the registered interrupt handlers. Tests
//! drive interrupts by hand with [`Timer::interrupt`]; a running kernel
//! starts a [`TimerDriver`] that fires them periodically in real time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use nos_api::{Tick, nos_debug};
use spin::Mutex as SpinMutex;

use crate::thread::KThread;

/// Ticks advanced per interrupt by default (roughly the hardware period of
/// the machine the kernel was written for).
pub const DEFAULT_TICKS_PER_INTERRUPT: Tick = 500;

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Kernel clock and interrupt source
pub struct Timer {
    now: AtomicU64,
    ticks_per_interrupt: Tick,
    handlers: SpinMutex<Vec<Handler>>,
}

impl Timer {
    /// Create a timer at tick 0
    pub fn new(ticks_per_interrupt: Tick) -> Arc<Self> {
        assert!(ticks_per_interrupt > 0, "a timer interrupt must advance the clock");
        Arc::new(Self {
            now: AtomicU64::new(0),
            ticks_per_interrupt,
            handlers: SpinMutex::new(Vec::new()),
        })
    }

    /// Current time in ticks
    pub fn now(&self) -> Tick {
        self.now.load(Ordering::Acquire)
    }

    /// Ticks advanced per interrupt
    pub fn ticks_per_interrupt(&self) -> Tick {
        self.ticks_per_interrupt
    }

    /// Register a handler to run on every interrupt.
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.lock().push(Arc::new(handler));
    }

    /// Advance the clock by one period and run the handlers.
    pub fn interrupt(&self) {
        self.now.fetch_add(self.ticks_per_interrupt, Ordering::AcqRel);
        // Handlers may block or yield; never hold the list lock across them.
        let handlers: Vec<Handler> = self.handlers.lock().clone();
        for handler in handlers {
            handler();
        }
    }
}

/// Background thread firing timer interrupts at a fixed real-time period
pub struct TimerDriver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerDriver {
    /// Start firing `timer` every `period`.
    pub fn start(timer: Arc<Timer>, period: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = KThread::spawn("timer", move || {
            while !flag.load(Ordering::Acquire) {
                std::thread::sleep(period);
                timer.interrupt();
            }
        })?;
        nos_debug!("timer driver started, period {:?}", period);
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the driver and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
