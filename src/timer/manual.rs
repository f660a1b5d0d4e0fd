use super::{Scheduler, TimerCallback, TimerId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::time::Duration;

struct TimerSlot {
    interval: Duration,
    next_due: Duration,
    /// `None` while the callback is running
    callback: Option<TimerCallback>,
}

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Nothing fires until [`ManualScheduler::advance`] is called; due timers then
/// run in deadline order, ties broken by creation order.
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    timers: RefCell<BTreeMap<TimerId, TimerSlot>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn active_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Moves the clock forward, firing every timer that comes due on the way.
    pub fn advance(&self, by: Duration) {
        let target = self.now.get() + by;

        while let Some(id) = self.next_due(target) {
            let callback = {
                let mut timers = self.timers.borrow_mut();
                let Some(slot) = timers.get_mut(&id) else {
                    continue;
                };
                self.now.set(slot.next_due);
                slot.next_due += slot.interval;
                slot.callback.take()
            };

            // The callback may cancel or schedule timers, so no borrow is held here.
            if let Some(mut callback) = callback {
                callback();
                if let Some(slot) = self.timers.borrow_mut().get_mut(&id) {
                    slot.callback = Some(callback);
                }
            }
        }

        self.now.set(target);
    }

    fn next_due(&self, target: Duration) -> Option<TimerId> {
        self.timers
            .borrow()
            .iter()
            .filter(|(_, slot)| slot.next_due <= target)
            .min_by_key(|(id, slot)| (slot.next_due, **id))
            .map(|(id, _)| *id)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_recurring(&self, interval: Duration, callback: TimerCallback) -> TimerId {
        let interval = interval.max(Duration::from_millis(1));
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        self.timers.borrow_mut().insert(
            id,
            TimerSlot {
                interval,
                next_due: self.now.get() + interval,
                callback: Some(callback),
            },
        );
        id
    }

    fn cancel(&self, id: TimerId) {
        self.timers.borrow_mut().remove(&id);
    }
}
