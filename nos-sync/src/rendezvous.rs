//! Tagged rendezvous
//!
//! Two threads calling [`Rendezvous::exchange`] with the same tag swap
//! values: the first to arrive sleeps until a partner shows up, and each
//! returns the other's value. Tags are independent meeting points and can
//! be reused for any number of exchanges.

use std::sync::Arc;

use hashbrown::HashMap;
use nos_api::nos_trace;

use crate::alarm::Alarm;
use crate::condition::Condition;
use crate::lock::Lock;

struct Slot {
    value: i32,
    reply: Option<i32>,
    cv: Arc<Condition>,
}

/// Synchronous value exchange between pairs of threads
pub struct Rendezvous {
    alarm: Arc<Alarm>,
    lock: Lock<Tags>,
}

#[derive(Default)]
struct Tags {
    // Waiting first arrivals, keyed by tag.
    waiting: HashMap<i32, u64>,
    slots: HashMap<u64, Slot>,
    next_id: u64,
}

impl Rendezvous {
    /// Create a rendezvous whose condition variables use `alarm`.
    pub fn new(alarm: Arc<Alarm>) -> Self {
        Self {
            alarm,
            lock: Lock::new(Tags::default()),
        }
    }

    /// Exchange `value` with the next thread to use `tag`.
    pub fn exchange(&self, tag: i32, value: i32) -> i32 {
        let mut tags = self.lock.acquire();

        if let Some(id) = tags.waiting.remove(&tag) {
            let Some(slot) = tags.slots.get_mut(&id) else {
                unreachable!("waiting tag {tag} has no slot");
            };
            slot.reply = Some(value);
            let partner = slot.value;
            let cv = Arc::clone(&slot.cv);
            cv.wake();
            nos_trace!("rendezvous: tag {} exchanged {} for {}", tag, value, partner);
            return partner;
        }

        let id = tags.next_id;
        tags.next_id += 1;
        let cv = Arc::new(Condition::new(&self.lock, Arc::clone(&self.alarm)));
        tags.waiting.insert(tag, id);
        tags.slots.insert(
            id,
            Slot {
                value,
                reply: None,
                cv: Arc::clone(&cv),
            },
        );

        loop {
            cv.sleep();
            if let Some(reply) = tags.slots.get(&id).and_then(|slot| slot.reply) {
                tags.slots.remove(&id);
                return reply;
            }
        }
    }
}
