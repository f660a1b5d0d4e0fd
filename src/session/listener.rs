use super::entry::EntryId;
use crate::platform::{LoadError, ViewerId};
use std::rc::{Rc, Weak};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryId(pub(crate) u64);

impl HistoryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Why a cached viewer was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Farther than the safe radius from the current index
    OutOfWindow,
    /// Registry-wide viewer cap exceeded
    GlobalCap,
    /// Aged out of the expiration tracker
    Expired,
    /// Entry truncated by a branching navigation
    Truncated,
    /// Entry overwritten in place
    Replaced,
    /// Entry dropped to respect `max_entries`
    Purged,
    /// Entry removed explicitly or collapsed as a duplicate
    Removed,
    MemoryPressure,
    /// Caller asked this history to drop every cached viewer
    Explicit,
}

/// Notifications delivered to [`HistoryListener`]s after an operation settles
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    NewEntry { index: usize, url: Url },
    IndexChanged { from: i32, to: usize },
    Reload { index: usize },
    LengthChanged { len: usize },
    Purged { count: usize },
    NavigationComplete { index: usize, restored: bool },
    NavigationFailed { index: usize, error: LoadError },
    ViewerEvicted {
        entry: EntryId,
        viewer: ViewerId,
        reason: EvictionReason,
    },
    /// A global index outside this partial history was requested
    CrossHistoryNavigation { global_index: usize },
}

/// Observer of one or more session histories.
///
/// Listeners are held weakly and called after the registry has released its
/// borrow, so they may call back into any history.
pub trait HistoryListener {
    fn on_history_event(&self, history: HistoryId, event: &HistoryEvent);
}

pub(crate) type Notification = (Rc<dyn HistoryListener>, HistoryId, HistoryEvent);

#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Weak<dyn HistoryListener>>,
}

impl ListenerSet {
    pub fn add(&mut self, listener: Weak<dyn HistoryListener>) {
        self.listeners.push(listener);
    }

    pub fn remove(&mut self, listener: &Rc<dyn HistoryListener>) {
        self.listeners
            .retain(|l| !std::ptr::addr_eq(l.as_ptr(), Rc::as_ptr(listener)));
    }

    /// Pairs every live listener with every pending event, pruning dead listeners.
    pub fn fan_out(&mut self, history: HistoryId, events: Vec<HistoryEvent>, out: &mut Vec<Notification>) {
        self.listeners.retain(|l| l.strong_count() > 0);
        if events.is_empty() {
            return;
        }
        let live: Vec<Rc<dyn HistoryListener>> =
            self.listeners.iter().filter_map(Weak::upgrade).collect();
        for event in events {
            for listener in &live {
                out.push((listener.clone(), history, event.clone()));
            }
        }
    }
}

pub(crate) fn deliver(notifications: Vec<Notification>) {
    for (listener, history, event) in notifications {
        listener.on_history_event(history, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Log(RefCell<Vec<HistoryEvent>>);

    impl HistoryListener for Log {
        fn on_history_event(&self, _history: HistoryId, event: &HistoryEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn test_fan_out_skips_dropped_listeners() {
        let mut set = ListenerSet::default();
        let kept = Rc::new(Log::default());
        let dropped = Rc::new(Log::default());
        let kept_dyn: Rc<dyn HistoryListener> = kept.clone();
        let dropped_dyn: Rc<dyn HistoryListener> = dropped.clone();
        set.add(Rc::downgrade(&kept_dyn));
        set.add(Rc::downgrade(&dropped_dyn));
        drop(dropped_dyn);
        drop(dropped);

        let mut out = Vec::new();
        set.fan_out(HistoryId(1), vec![HistoryEvent::LengthChanged { len: 2 }], &mut out);
        deliver(out);

        assert_eq!(*kept.0.borrow(), vec![HistoryEvent::LengthChanged { len: 2 }]);
    }

    #[test]
    fn test_remove_listener() {
        let mut set = ListenerSet::default();
        let log = Rc::new(Log::default());
        let log_dyn: Rc<dyn HistoryListener> = log.clone();
        set.add(Rc::downgrade(&log_dyn));
        set.remove(&log_dyn);

        let mut out = Vec::new();
        set.fan_out(HistoryId(1), vec![HistoryEvent::Purged { count: 1 }], &mut out);
        assert!(out.is_empty());
    }
}
