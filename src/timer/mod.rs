//! Recurring timers for the expiration tracker.
//!
//! Everything here runs on the thread that owns the session histories; callbacks
//! are never invoked concurrently with history mutation.

pub mod local;
pub mod manual;

pub use local::LocalScheduler;
pub use manual::ManualScheduler;

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub type TimerCallback = Box<dyn FnMut()>;

pub trait Scheduler {
    /// Invokes `callback` every `interval` until cancelled.
    fn schedule_recurring(&self, interval: Duration, callback: TimerCallback) -> TimerId;

    /// Cancels a timer. Once this returns the callback will not run again.
    /// Cancelling an unknown or already cancelled timer is a no-op.
    fn cancel(&self, id: TimerId);
}
