//! Per-history navigation state and bfcache bookkeeping.
//!
//! Everything in here runs with the registry borrowed; nothing calls listeners
//! directly. Events are queued in `events` and fanned out once the registry
//! releases its borrow.

use super::entry::{Entry, EntryId};
use super::listener::{EvictionReason, HistoryEvent, HistoryId, ListenerSet, Notification};
use super::settings::HistorySettings;
use super::transaction::TransactionList;
use crate::error::{HistoryError, Result};
use crate::expiration::{ExpirationHandler, ExpirationTracker};
use crate::platform::{
    ContentViewer, LoadError, LoadRequest, LoadStatus, LoadType, Teardown, TeardownToken, ViewerLoader,
};
use std::ops::Range;
use std::rc::{Rc, Weak};

/// A cached viewer considered by the registry-wide cap
#[derive(Debug, Clone, Copy)]
pub(crate) struct CachedViewer {
    pub history: HistoryId,
    pub entry: EntryId,
    pub last_touched: u64,
    pub outside_window: bool,
}

/// Hands viewers to the root container for teardown and keeps the ones that
/// are still draining alive until their teardown completes.
pub(crate) struct ViewerDisposer {
    loader: Weak<dyn ViewerLoader>,
    draining: Vec<(ContentViewer, TeardownToken)>,
}

impl ViewerDisposer {
    fn new(loader: Weak<dyn ViewerLoader>) -> Self {
        Self {
            loader,
            draining: Vec::new(),
        }
    }

    fn loader(&self) -> Result<Rc<dyn ViewerLoader>> {
        self.loader
            .upgrade()
            .ok_or_else(|| HistoryError::unexpected("root navigation container is gone"))
    }

    fn dispose(&mut self, mut viewer: ContentViewer) -> Result<()> {
        let loader = match self.loader() {
            Ok(loader) => loader,
            Err(e) => {
                // Nobody left to tear it down; freeing is all we can do.
                drop(viewer);
                return Err(e);
            }
        };
        match loader.destroy_viewer(&mut viewer) {
            Teardown::Complete => {}
            Teardown::Draining(token) => {
                log::debug!("viewer {:?} still draining, deferring release", viewer.id());
                self.draining.push((viewer, token));
            }
        }
        Ok(())
    }

    /// Logs instead of failing; used on eviction paths that must not abort.
    fn dispose_or_log(&mut self, viewer: ContentViewer) {
        let id = viewer.id();
        if let Err(e) = self.dispose(viewer) {
            log::warn!("teardown of viewer {:?} failed: {}", id, e);
        }
    }

    fn reap(&mut self) -> usize {
        let before = self.draining.len();
        self.draining.retain(|(_, token)| !token.is_complete());
        before - self.draining.len()
    }

    fn flush(&mut self) {
        if self.draining.is_empty() {
            return;
        }
        if let Some(loader) = self.loader.upgrade() {
            loader.flush_teardown();
        }
        self.reap();
        if !self.draining.is_empty() {
            log::warn!("{} viewer(s) still draining after flush", self.draining.len());
        }
    }

    fn len(&self) -> usize {
        self.draining.len()
    }
}

/// Takes the cached viewer out of `entry`, if any, and disposes of it.
fn drop_cached_viewer(
    entry: &mut Entry,
    tracker: Option<&mut ExpirationTracker<EntryId>>,
    disposer: &mut ViewerDisposer,
    events: &mut Vec<HistoryEvent>,
    reason: EvictionReason,
) -> bool {
    let Some(viewer) = entry.take_viewer() else {
        return false;
    };
    if let Some(tracker) = tracker {
        tracker.remove(&entry.id());
    }
    log::debug!("evicting viewer {:?} of {} ({:?})", viewer.id(), entry.url(), reason);
    events.push(HistoryEvent::ViewerEvicted {
        entry: entry.id(),
        viewer: viewer.id(),
        reason,
    });
    disposer.dispose_or_log(viewer);
    true
}

/// Expiration action: drop the cached viewer of an aged-out entry
struct ExpireViewers<'a> {
    list: &'a mut TransactionList,
    disposer: &'a mut ViewerDisposer,
    events: &'a mut Vec<HistoryEvent>,
}

impl ExpirationHandler<EntryId> for ExpireViewers<'_> {
    type Error = HistoryError;

    fn notify_expired(&mut self, key: EntryId) -> Result<()> {
        // The tracker only holds ids; the entry may be gone already.
        let Some(index) = self.list.position(key) else {
            return Ok(());
        };
        let Some(entry) = self.list.get_mut(index) else {
            return Ok(());
        };
        let Some(viewer) = entry.take_viewer() else {
            return Ok(());
        };
        log::debug!("viewer {:?} of {} expired", viewer.id(), entry.url());
        self.events.push(HistoryEvent::ViewerEvicted {
            entry: key,
            viewer: viewer.id(),
            reason: EvictionReason::Expired,
        });
        self.disposer.dispose(viewer)
    }
}

pub(crate) struct HistoryState {
    id: HistoryId,
    list: TransactionList,
    tracker: ExpirationTracker<EntryId>,
    disposer: ViewerDisposer,
    /// Viewer of the document currently displayed
    current_viewer: Option<ContentViewer>,
    /// Entry whose load is still in flight
    pending: Option<EntryId>,
    listeners: ListenerSet,
    events: Vec<HistoryEvent>,
    global_index_offset: usize,
    entries_after: usize,
    is_partial: bool,
}

impl HistoryState {
    pub fn new(id: HistoryId, loader: Weak<dyn ViewerLoader>, tracker: ExpirationTracker<EntryId>) -> Self {
        Self {
            id,
            list: TransactionList::new(),
            tracker,
            disposer: ViewerDisposer::new(loader),
            current_viewer: None,
            pending: None,
            listeners: ListenerSet::default(),
            events: Vec::new(),
            global_index_offset: 0,
            entries_after: 0,
            is_partial: false,
        }
    }

    pub fn list(&self) -> &TransactionList {
        &self.list
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerSet {
        &mut self.listeners
    }

    pub fn current_viewer(&self) -> Option<&ContentViewer> {
        self.current_viewer.as_ref()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn draining_count(&self) -> usize {
        self.disposer.len()
    }

    pub fn requested_index(&self) -> Option<usize> {
        self.pending.and_then(|id| self.list.position(id))
    }

    pub fn cached_count(&self) -> usize {
        self.list.iter().filter(|e| e.is_heavy()).count()
    }

    pub fn cached_viewers(&self, safe_radius: usize) -> Vec<CachedViewer> {
        let index = self.list.current_index().unwrap_or(0);
        self.list
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_heavy())
            .map(|(i, entry)| CachedViewer {
                history: self.id,
                entry: entry.id(),
                last_touched: entry.last_touched(),
                outside_window: i.abs_diff(index) > safe_radius,
            })
            .collect()
    }

    pub fn take_notifications(&mut self, out: &mut Vec<Notification>) {
        let events = std::mem::take(&mut self.events);
        self.listeners.fan_out(self.id, events, out);
    }

    fn loader(&self) -> Result<Rc<dyn ViewerLoader>> {
        self.disposer.loader()
    }

    fn check_not_pending(&self) -> Result<()> {
        if let Some(id) = self.pending {
            let requested = self
                .list
                .position(id)
                .or(self.list.current_index())
                .unwrap_or(0);
            log::debug!("rejecting navigation: load of index {} still pending", requested);
            return Err(HistoryError::Pending { requested });
        }
        Ok(())
    }

    fn discard(&mut self, entries: Vec<Entry>, reason: EvictionReason) {
        for mut entry in entries {
            if self.pending == Some(entry.id()) {
                self.pending = None;
            }
            drop_cached_viewer(&mut entry, Some(&mut self.tracker), &mut self.disposer, &mut self.events, reason);
        }
    }

    fn note_length(&mut self, before: usize) {
        if self.list.len() != before {
            self.events.push(HistoryEvent::LengthChanged { len: self.list.len() });
        }
    }

    /// Offers the displayed document's viewer to the bfcache, stored on the current entry.
    fn cache_outgoing_viewer(&mut self, loader: &dyn ViewerLoader, stamp: u64) {
        let Some(viewer) = self.current_viewer.take() else {
            return;
        };
        let Some(entry) = self.list.current_mut() else {
            self.disposer.dispose_or_log(viewer);
            return;
        };

        if !loader.can_cache(entry) {
            log::debug!("{} is not cacheable, destroying its viewer", entry.url());
            self.disposer.dispose_or_log(viewer);
            return;
        }

        if let Err(e) = self.tracker.add(entry.id()) {
            log::warn!("could not track viewer for {}: {}", entry.url(), e);
            self.disposer.dispose_or_log(viewer);
            return;
        }

        log::debug!("caching viewer {:?} for {}", viewer.id(), entry.url());
        if let Some(previous) = entry.set_viewer(viewer, stamp) {
            self.disposer.dispose_or_log(previous);
        }
    }

    fn install_viewer(&mut self, viewer: ContentViewer, index: usize, restored: bool) {
        if let Some(previous) = self.current_viewer.replace(viewer) {
            self.disposer.dispose_or_log(previous);
        }
        self.events.push(HistoryEvent::NavigationComplete { index, restored });
    }

    fn start_load(
        &mut self,
        loader: &dyn ViewerLoader,
        index: usize,
        load_type: LoadType,
        cached_viewer: Option<ContentViewer>,
    ) -> Result<()> {
        let restored = cached_viewer.is_some();
        let entry = self
            .list
            .get(index)
            .ok_or_else(|| HistoryError::unexpected(format!("load target {} vanished", index)))?;
        let entry_id = entry.id();
        log::info!("loading {} ({:?}, restored: {})", entry.url(), load_type, restored);

        let status = loader.load(LoadRequest {
            entry,
            load_type,
            cached_viewer,
        });

        match status {
            Ok(LoadStatus::Complete(viewer)) => {
                self.install_viewer(viewer, index, restored);
                Ok(())
            }
            Ok(LoadStatus::Pending) => {
                self.pending = Some(entry_id);
                Ok(())
            }
            Err(error) => {
                log::warn!("load of index {} failed: {}", index, error);
                self.events.push(HistoryEvent::NavigationFailed {
                    index,
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }

    pub fn navigate(&mut self, entry: Entry, load_type: LoadType, settings: &HistorySettings, stamp: u64) -> Result<()> {
        self.disposer.reap();
        if load_type == LoadType::Redirect {
            // A redirect supersedes the load in flight rather than racing it.
            self.pending = None;
        } else {
            self.check_not_pending()?;
        }
        let loader = self.loader()?;

        let replace = load_type.replaces_current();
        let before = self.list.len();
        if replace {
            if let Some(viewer) = self.current_viewer.take() {
                self.disposer.dispose_or_log(viewer);
            }
        } else {
            self.cache_outgoing_viewer(&*loader, stamp);
        }

        let url = entry.url().clone();
        let displaced = self.list.add(entry, replace)?;
        self.discard(
            displaced,
            if replace { EvictionReason::Replaced } else { EvictionReason::Truncated },
        );

        self.enforce_max_entries(settings.max_entries);
        let index = self
            .list
            .current_index()
            .ok_or_else(|| HistoryError::unexpected("no current entry after add"))?;
        self.events.push(HistoryEvent::NewEntry { index, url });
        self.note_length(before);

        self.evict_out_of_range(index, settings.safe_radius);
        self.start_load(&*loader, index, load_type, None)
    }

    pub fn goto_index(&mut self, index: usize, settings: &HistorySettings, stamp: u64) -> Result<()> {
        self.disposer.reap();
        self.check_not_pending()?;

        let len = self.list.len();
        if index >= len {
            return Err(HistoryError::index_out_of_range(index as i64, len));
        }
        if self.list.current_index() == Some(index) {
            return Ok(());
        }
        let loader = self.loader()?;

        let from = self.list.index();
        self.cache_outgoing_viewer(&*loader, stamp);

        let restored = match self.list.get_mut(index) {
            Some(entry) => {
                let viewer = entry.take_viewer();
                if viewer.is_some() {
                    self.tracker.remove(&entry.id());
                    entry.touch(stamp);
                }
                viewer
            }
            None => None,
        };

        self.list.set_index(index)?;
        self.events.push(HistoryEvent::IndexChanged { from, to: index });

        self.evict_out_of_range(index, settings.safe_radius);
        self.start_load(&*loader, index, LoadType::History, restored)
    }

    /// Moves `delta` positions from the current index.
    pub fn goto_offset(&mut self, delta: i64, settings: &HistorySettings, stamp: u64) -> Result<()> {
        self.check_not_pending()?;
        let target = self.list.index() as i64 + delta;
        if target < 0 || target >= self.list.len() as i64 {
            return Err(HistoryError::index_out_of_range(target, self.list.len()));
        }
        self.goto_index(target as usize, settings, stamp)
    }

    pub fn reload(&mut self) -> Result<()> {
        self.disposer.reap();
        self.check_not_pending()?;
        let index = self
            .list
            .current_index()
            .ok_or_else(|| HistoryError::InvalidArgument("nothing to reload".to_string()))?;
        let loader = self.loader()?;

        if let Some(viewer) = self.current_viewer.take() {
            self.disposer.dispose_or_log(viewer);
        }
        self.events.push(HistoryEvent::Reload { index });
        self.start_load(&*loader, index, LoadType::Reload, None)
    }

    /// Completes the in-flight load with the collaborator's outcome.
    pub fn finish_load(&mut self, result: std::result::Result<ContentViewer, LoadError>) -> Result<()> {
        let Some(id) = self.pending.take() else {
            if let Ok(viewer) = result {
                self.disposer.dispose_or_log(viewer);
            }
            return Err(HistoryError::unexpected("finish_load without a pending load"));
        };

        let Some(index) = self.list.position(id) else {
            // The entry was removed while loading; its document has nowhere to go.
            if let Ok(viewer) = result {
                self.disposer.dispose_or_log(viewer);
            }
            return Err(HistoryError::unexpected("pending entry removed before its load finished"));
        };

        match result {
            Ok(viewer) => {
                self.install_viewer(viewer, index, false);
                Ok(())
            }
            Err(error) => {
                log::warn!("load of index {} failed: {}", index, error);
                self.events.push(HistoryEvent::NavigationFailed {
                    index,
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn evict_out_of_range(&mut self, index: usize, safe_radius: usize) -> usize {
        let start = index.saturating_sub(safe_radius);
        let end = index.saturating_add(safe_radius);
        let mut evicted = 0;
        for (i, entry) in self.list.iter_mut().enumerate() {
            if (i < start || i > end)
                && drop_cached_viewer(
                    entry,
                    Some(&mut self.tracker),
                    &mut self.disposer,
                    &mut self.events,
                    EvictionReason::OutOfWindow,
                )
            {
                evicted += 1;
            }
        }
        evicted
    }

    /// Evicts the cached viewer of `entry`; a light or unknown entry is a no-op.
    pub fn evict_entry(&mut self, entry: EntryId, reason: EvictionReason) -> bool {
        let Some(index) = self.list.position(entry) else {
            return false;
        };
        match self.list.get_mut(index) {
            Some(entry) => drop_cached_viewer(
                entry,
                Some(&mut self.tracker),
                &mut self.disposer,
                &mut self.events,
                reason,
            ),
            None => false,
        }
    }

    pub fn evict_all(&mut self, reason: EvictionReason) -> usize {
        let mut evicted = 0;
        for entry in self.list.iter_mut() {
            if drop_cached_viewer(entry, Some(&mut self.tracker), &mut self.disposer, &mut self.events, reason) {
                evicted += 1;
            }
        }
        evicted
    }

    /// One tick of the expiration timer.
    pub fn age_one_generation(&mut self) -> usize {
        self.disposer.reap();
        let mut handler = ExpireViewers {
            list: &mut self.list,
            disposer: &mut self.disposer,
            events: &mut self.events,
        };
        self.tracker.age_one_generation(&mut handler)
    }

    pub fn remove_duplicate(&mut self, index: usize, keep_next: bool) -> Result<bool> {
        let before = self.list.len();
        let removed = self.collapse_duplicate(index, keep_next)?;
        self.note_length(before);
        Ok(removed)
    }

    fn collapse_duplicate(&mut self, index: usize, keep_next: bool) -> Result<bool> {
        let loader = self.loader()?;
        let removed = self
            .list
            .remove_duplicate(index, keep_next, |a, b| loader.is_same_document(a, b))?;
        match removed {
            Some(entry) => {
                log::debug!("collapsed duplicate entry {} at {}", entry.url(), index);
                self.discard(vec![entry], EvictionReason::Removed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes `range` (which must not contain the current entry), then
    /// collapses a duplicate formed where the two sides meet.
    pub fn remove_entries(&mut self, range: Range<usize>) -> Result<usize> {
        if let Some(current) = self.list.current_index() {
            if range.contains(&current) {
                return Err(HistoryError::InvalidArgument(format!(
                    "range {:?} contains the current entry {}",
                    range, current
                )));
            }
        }
        let before = self.list.len();
        let removed = self.list.remove_range(range.clone())?;
        self.discard(removed, EvictionReason::Removed);

        let seam = range.start;
        let current = self.list.current_index();
        if seam > 0 && seam < self.list.len() {
            if current != Some(seam - 1) {
                self.collapse_duplicate(seam - 1, true)?;
            } else if current != Some(seam) {
                self.collapse_duplicate(seam, false)?;
            }
        }
        self.note_length(before);
        Ok(before - self.list.len())
    }

    pub fn replace_entry(&mut self, index: usize, entry: Entry) -> Result<()> {
        let old = self.list.replace_at(index, entry)?;
        if self.pending == Some(old.id()) {
            self.pending = None;
        }
        self.discard(vec![old], EvictionReason::Replaced);
        Ok(())
    }

    /// Drops the `count` oldest entries.
    pub fn purge(&mut self, count: usize) -> usize {
        let current = self.list.current().map(Entry::id);
        let before = self.list.len();
        let purged = self.list.purge(count);
        let purged_count = purged.len();
        if purged_count == 0 {
            return 0;
        }

        // The displayed document belonged to a purged entry. The surviving
        // entry the index now points at must not keep a cached viewer.
        if current.is_some() && purged.iter().any(|e| Some(e.id()) == current) {
            if let Some(viewer) = self.current_viewer.take() {
                self.disposer.dispose_or_log(viewer);
            }
            if let Some(id) = self.list.current().map(Entry::id) {
                self.evict_entry(id, EvictionReason::Purged);
            }
        }
        self.discard(purged, EvictionReason::Purged);
        log::info!("purged {} history entries", purged_count);
        self.events.push(HistoryEvent::Purged { count: purged_count });
        self.note_length(before);
        purged_count
    }

    fn enforce_max_entries(&mut self, max_entries: usize) {
        let len = self.list.len();
        if len > max_entries {
            self.purge(len - max_entries);
        }
    }

    pub fn set_partial(&mut self, global_index_offset: usize, entries_after: usize) {
        self.is_partial = true;
        self.global_index_offset = global_index_offset;
        self.entries_after = entries_after;
    }

    pub fn global_count(&self) -> usize {
        self.global_index_offset + self.list.len() + self.entries_after
    }

    pub fn global_index(&self) -> i64 {
        match self.list.current_index() {
            Some(index) => (self.global_index_offset + index) as i64,
            None => -1,
        }
    }

    pub fn goto_global_index(&mut self, global_index: usize, settings: &HistorySettings, stamp: u64) -> Result<()> {
        self.check_not_pending()?;
        if global_index >= self.global_count() {
            return Err(HistoryError::index_out_of_range(global_index as i64, self.global_count()));
        }

        let local = global_index
            .checked_sub(self.global_index_offset)
            .filter(|local| *local < self.list.len());
        match local {
            Some(local) => self.goto_index(local, settings, stamp),
            None if self.is_partial => {
                log::info!("global index {} lives in another partial history", global_index);
                self.events.push(HistoryEvent::CrossHistoryNavigation { global_index });
                Ok(())
            }
            None => Err(HistoryError::index_out_of_range(global_index as i64, self.list.len())),
        }
    }

    pub fn flush_teardown(&mut self) {
        self.disposer.flush();
    }

    /// Releases every viewer this history holds. Called when it is unregistered.
    pub fn teardown(&mut self) {
        self.pending = None;
        self.tracker.clear();
        for mut entry in self.list.clear() {
            if let Some(viewer) = entry.take_viewer() {
                self.disposer.dispose_or_log(viewer);
            }
        }
        if let Some(viewer) = self.current_viewer.take() {
            self.disposer.dispose_or_log(viewer);
        }
        self.disposer.flush();
        self.events.clear();
    }
}
