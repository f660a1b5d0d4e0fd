use super::{Scheduler, TimerCallback, TimerId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Tokio-backed scheduler for the thread that owns the session histories.
///
/// Timers are `spawn_local` tasks, so the scheduler must be used from inside a
/// [`tokio::task::LocalSet`]. Callbacks run on that thread between other tasks.
#[derive(Default)]
pub struct LocalScheduler {
    next_id: Cell<u64>,
    tasks: RefCell<HashMap<TimerId, JoinHandle<()>>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_timers(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Scheduler for LocalScheduler {
    fn schedule_recurring(&self, interval: Duration, mut callback: TimerCallback) -> TimerId {
        let interval = interval.max(Duration::from_millis(1));
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let handle = tokio::task::spawn_local(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback();
            }
        });

        log::debug!("scheduled recurring timer {:?} every {:?}", id, interval);
        self.tasks.borrow_mut().insert(id, handle);
        id
    }

    fn cancel(&self, id: TimerId) {
        // Aborting from the owning thread means the task is not mid-poll, so it
        // never runs again once this returns.
        if let Some(handle) = self.tasks.borrow_mut().remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.borrow_mut().drain() {
            handle.abort();
        }
    }
}
