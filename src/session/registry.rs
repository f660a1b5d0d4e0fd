//! Process-scoped registry of live session histories.
//!
//! The registry owns every history's state so that cross-history eviction
//! (the global viewer cap, memory pressure) runs under a single borrow. Each
//! [`SessionHistory`](super::SessionHistory) is a handle into it.

use super::entry::EntryId;
use super::listener::{deliver, EvictionReason, HistoryId, Notification};
use super::settings::HistorySettings;
use super::state::HistoryState;
use crate::error::{HistoryError, Result};
use crate::expiration::ExpirationTracker;
use crate::platform::{max_viewers_for_memory, MemoryInfo, ViewerLoader};
use crate::timer::Scheduler;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    /// Trim down to the viewer cap
    Low,
    /// Drop every cached viewer in every history
    Critical,
}

pub(crate) struct RegistryInner {
    settings: HistorySettings,
    max_total_viewers: usize,
    memory: Rc<dyn MemoryInfo>,
    scheduler: Rc<dyn Scheduler>,
    histories: BTreeMap<HistoryId, HistoryState>,
    next_history_id: u64,
    /// Logical clock ordering viewer use across histories
    clock: u64,
    shut_down: bool,
}

impl RegistryInner {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn total_cached(&self) -> usize {
        self.histories.values().map(HistoryState::cached_count).sum()
    }

    /// Evicts cached viewers until the registry-wide count fits the cap.
    ///
    /// Viewers outside their history's safe radius go first, then the least
    /// recently used.
    fn globally_evict(&mut self) -> usize {
        let max = self.max_total_viewers;
        let radius = self.settings.safe_radius;
        let mut candidates: Vec<_> = self
            .histories
            .values()
            .flat_map(|history| history.cached_viewers(radius))
            .collect();
        if candidates.len() <= max {
            return 0;
        }

        candidates.sort_by_key(|c| (!c.outside_window, c.last_touched));
        let excess = candidates.len() - max;
        log::debug!(
            "{} cached viewers exceed the cap of {}, evicting {}",
            candidates.len(),
            max,
            excess
        );

        let mut evicted = 0;
        for candidate in candidates.into_iter().take(excess) {
            if let Some(history) = self.histories.get_mut(&candidate.history) {
                if history.evict_entry(candidate.entry, EvictionReason::GlobalCap) {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    fn evict_everything(&mut self, reason: EvictionReason) -> usize {
        self.histories
            .values_mut()
            .map(|history| history.evict_all(reason))
            .sum()
    }

    /// Tears down histories whose handles were dropped while the registry was borrowed.
    fn release_orphans(&mut self, orphans: &RefCell<Vec<HistoryId>>) {
        let ids = std::mem::take(&mut *orphans.borrow_mut());
        for id in ids {
            if let Some(mut history) = self.histories.remove(&id) {
                history.teardown();
                log::debug!("released orphaned history {:?}", id);
            }
        }
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        for history in self.histories.values_mut() {
            history.take_notifications(&mut out);
        }
        out
    }
}

fn compute_max_viewers(settings: &HistorySettings, memory: &dyn MemoryInfo) -> usize {
    if settings.max_total_viewers >= 0 {
        return settings.max_total_viewers as usize;
    }
    let total_mb = memory.total_physical_memory_mb();
    let viewers = max_viewers_for_memory(total_mb);
    log::info!("{} MB of physical memory allows {} cached viewers", total_mb, viewers);
    viewers
}

#[derive(Clone)]
pub struct HistoryRegistry {
    inner: Rc<RefCell<RegistryInner>>,
    /// Histories dropped while `inner` was borrowed, released on next access
    orphans: Rc<RefCell<Vec<HistoryId>>>,
}

impl HistoryRegistry {
    pub fn new(
        settings: HistorySettings,
        scheduler: Rc<dyn Scheduler>,
        memory: Rc<dyn MemoryInfo>,
    ) -> Result<Self> {
        settings.validate()?;
        let max_total_viewers = compute_max_viewers(&settings, &*memory);

        Ok(Self {
            inner: Rc::new(RefCell::new(RegistryInner {
                settings,
                max_total_viewers,
                memory,
                scheduler,
                histories: BTreeMap::new(),
                next_history_id: 1,
                clock: 0,
                shut_down: false,
            })),
            orphans: Rc::new(RefCell::new(Vec::new())),
        })
    }

    pub fn settings(&self) -> HistorySettings {
        self.inner.borrow().settings.clone()
    }

    pub fn max_total_viewers(&self) -> usize {
        self.inner.borrow().max_total_viewers
    }

    pub fn history_count(&self) -> usize {
        self.collect_orphans();
        self.inner.borrow().histories.len()
    }

    /// Cached (heavy) entries across every registered history
    pub fn total_cached_viewers(&self) -> usize {
        self.collect_orphans();
        self.inner.borrow().total_cached()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.borrow().shut_down
    }

    /// Applies new settings and re-enforces the cap and every history's window.
    ///
    /// The eviction timeout only affects histories created afterwards.
    pub fn update_settings(&self, settings: HistorySettings) -> Result<()> {
        settings.validate()?;
        self.settle(|inner| {
            inner.max_total_viewers = compute_max_viewers(&settings, &*inner.memory);
            inner.settings = settings;
            let radius = inner.settings.safe_radius;
            for history in inner.histories.values_mut() {
                if let Some(index) = history.list().current_index() {
                    history.evict_out_of_range(index, radius);
                }
            }
            Ok(())
        })
    }

    pub fn notify_memory_pressure(&self, level: MemoryPressure) {
        log::info!("memory pressure: {:?}", level);
        let result = self.settle(|inner| {
            if level == MemoryPressure::Critical {
                inner.evict_everything(EvictionReason::MemoryPressure);
            }
            Ok(())
        });
        if let Err(e) = result {
            log::warn!("memory pressure handling skipped: {}", e);
        }
    }

    /// Drops every cached viewer in every history.
    pub fn evict_all_content_viewers(&self) -> Result<usize> {
        self.settle(|inner| Ok(inner.evict_everything(EvictionReason::Explicit)))
    }

    /// Tears down every history and refuses further work.
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        let histories = std::mem::take(&mut inner.histories);
        drop(inner);

        log::info!("shutting down {} session histories", histories.len());
        for (_, mut history) in histories {
            history.teardown();
        }
    }

    pub(crate) fn register(&self, loader: Weak<dyn ViewerLoader>) -> Result<HistoryId> {
        let mut inner = self.inner.borrow_mut();
        if inner.shut_down {
            return Err(HistoryError::unexpected("registry has been shut down"));
        }
        let id = HistoryId(inner.next_history_id);
        inner.next_history_id += 1;

        let weak = Rc::downgrade(&self.inner);
        let on_tick: Rc<dyn Fn()> = Rc::new(move || age_history(&weak, id));
        let tracker: ExpirationTracker<EntryId> = ExpirationTracker::new(
            inner.settings.eviction_timeout(),
            "HistoryTracker",
            inner.scheduler.clone(),
            on_tick,
        );

        inner.histories.insert(id, HistoryState::new(id, loader, tracker));
        log::debug!("registered history {:?}", id);
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: HistoryId) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            log::warn!("history {:?} dropped while the registry was busy, releasing it later", id);
            self.orphans.borrow_mut().push(id);
            return;
        };
        let removed = inner.histories.remove(&id);
        drop(inner);

        if let Some(mut history) = removed {
            history.teardown();
            log::debug!("unregistered history {:?}", id);
        }
    }

    /// Runs `op` against one history, then settles the global cap and
    /// delivers notifications.
    pub(crate) fn with_history<T>(
        &self,
        id: HistoryId,
        op: impl FnOnce(&mut HistoryState, &HistorySettings, u64) -> Result<T>,
    ) -> Result<T> {
        self.settle(|inner| {
            let stamp = inner.next_stamp();
            let RegistryInner {
                histories, settings, ..
            } = inner;
            let history = histories
                .get_mut(&id)
                .ok_or_else(|| HistoryError::unexpected(format!("history {:?} is not registered", id)))?;
            op(history, &*settings, stamp)
        })
    }

    /// Read-only access to one history.
    pub(crate) fn inspect<T>(&self, id: HistoryId, f: impl FnOnce(&HistoryState) -> T) -> Result<T> {
        let inner = self.inner.borrow();
        inner
            .histories
            .get(&id)
            .map(f)
            .ok_or_else(|| HistoryError::unexpected(format!("history {:?} is not registered", id)))
    }

    fn collect_orphans(&self) {
        if self.orphans.borrow().is_empty() {
            return;
        }
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.release_orphans(&self.orphans);
        }
    }

    fn settle<T>(&self, op: impl FnOnce(&mut RegistryInner) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.borrow_mut();
        if inner.shut_down {
            return Err(HistoryError::unexpected("registry has been shut down"));
        }
        inner.release_orphans(&self.orphans);
        let result = op(&mut *inner);
        inner.globally_evict();
        let notifications = inner.take_notifications();
        drop(inner);

        deliver(notifications);
        result
    }
}

/// Timer entry point: one aging generation for one history.
fn age_history(registry: &Weak<RefCell<RegistryInner>>, id: HistoryId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let Ok(mut inner) = registry.try_borrow_mut() else {
        log::warn!("aging tick for {:?} skipped: registry busy", id);
        return;
    };
    let Some(history) = inner.histories.get_mut(&id) else {
        return;
    };
    history.age_one_generation();
    let notifications = inner.take_notifications();
    drop(inner);

    deliver(notifications);
}
