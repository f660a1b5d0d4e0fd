use super::entry::Entry;
use super::listener::{EvictionReason, HistoryId, HistoryListener};
use super::registry::HistoryRegistry;
use crate::error::{HistoryError, Result};
use crate::platform::{ContentViewer, LoadError, LoadType, ViewerId, ViewerLoader};
use std::ops::Range;
use std::rc::{Rc, Weak};

/// Session history of one top-level browsing context.
///
/// A handle into a [`HistoryRegistry`]; the registry owns the entries and
/// cached viewers. Dropping the handle unregisters the history and releases
/// everything it caches.
pub struct SessionHistory {
    id: HistoryId,
    registry: HistoryRegistry,
}

impl SessionHistory {
    /// Registers a new, empty history whose loads and teardowns go through `loader`.
    ///
    /// The loader is held weakly; once it is dropped, navigation fails with
    /// [`HistoryError::Unexpected`].
    pub fn new<L: ViewerLoader + 'static>(registry: &HistoryRegistry, loader: &Rc<L>) -> Result<Self> {
        let loader: Rc<dyn ViewerLoader> = loader.clone();
        let weak: Weak<dyn ViewerLoader> = Rc::downgrade(&loader);
        let id = registry.register(weak)?;
        Ok(Self {
            id,
            registry: registry.clone(),
        })
    }

    pub fn id(&self) -> HistoryId {
        self.id
    }

    pub fn registry(&self) -> &HistoryRegistry {
        &self.registry
    }

    pub fn count(&self) -> usize {
        self.registry.inspect(self.id, |h| h.list().len()).unwrap_or(0)
    }

    /// Current index, or -1 when empty
    pub fn index(&self) -> i32 {
        self.registry.inspect(self.id, |h| h.list().index()).unwrap_or(-1)
    }

    /// Index whose load is still in flight
    pub fn requested_index(&self) -> Option<usize> {
        self.registry.inspect(self.id, |h| h.requested_index()).ok().flatten()
    }

    pub fn is_pending(&self) -> bool {
        self.requested_index().is_some()
    }

    pub fn can_go_back(&self) -> bool {
        self.registry.inspect(self.id, |h| h.list().can_go_back()).unwrap_or(false)
    }

    pub fn can_go_forward(&self) -> bool {
        self.registry.inspect(self.id, |h| h.list().can_go_forward()).unwrap_or(false)
    }

    /// Copy of the entry at `index`, without its cached viewer.
    pub fn entry_at(&self, index: usize) -> Result<Entry> {
        self.registry.inspect(self.id, |h| {
            let len = h.list().len();
            h.list()
                .get(index)
                .map(Entry::clone_light)
                .ok_or_else(|| HistoryError::index_out_of_range(index as i64, len))
        })?
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.registry
            .inspect(self.id, |h| h.list().iter().map(Entry::clone_light).collect())
            .unwrap_or_default()
    }

    /// Indices of entries holding a cached viewer
    pub fn cached_indices(&self) -> Vec<usize> {
        self.registry
            .inspect(self.id, |h| {
                h.list()
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.is_heavy())
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cached_count(&self) -> usize {
        self.registry.inspect(self.id, |h| h.cached_count()).unwrap_or(0)
    }

    /// Viewer of the displayed document
    pub fn current_viewer_id(&self) -> Option<ViewerId> {
        self.registry
            .inspect(self.id, |h| h.current_viewer().map(ContentViewer::id))
            .ok()
            .flatten()
    }

    /// Entries currently tracked for expiration
    pub fn tracked_count(&self) -> usize {
        self.registry.inspect(self.id, |h| h.tracked_count()).unwrap_or(0)
    }

    /// Viewers whose asynchronous teardown has not completed yet
    pub fn draining_teardowns(&self) -> usize {
        self.registry.inspect(self.id, |h| h.draining_count()).unwrap_or(0)
    }

    /// Adds `entry` at the current position and loads it.
    ///
    /// Normal and link loads truncate forward history; replace, reload and
    /// redirect loads overwrite the current entry. The outgoing document's
    /// viewer is offered to the bfcache.
    pub fn navigate(&self, entry: Entry, load_type: LoadType) -> Result<()> {
        self.registry
            .with_history(self.id, |h, settings, stamp| h.navigate(entry, load_type, settings, stamp))
    }

    pub fn go_back(&self) -> Result<()> {
        self.go_offset(-1)
    }

    pub fn go_forward(&self) -> Result<()> {
        self.go_offset(1)
    }

    pub fn go_offset(&self, delta: i64) -> Result<()> {
        self.registry
            .with_history(self.id, |h, settings, stamp| h.goto_offset(delta, settings, stamp))
    }

    /// Moves to `index`, restoring its cached viewer when it has one.
    pub fn goto_index(&self, index: usize) -> Result<()> {
        self.registry
            .with_history(self.id, |h, settings, stamp| h.goto_index(index, settings, stamp))
    }

    pub fn reload(&self) -> Result<()> {
        self.registry.with_history(self.id, |h, _, _| h.reload())
    }

    /// Completes a load that reported [`LoadStatus::Pending`](crate::platform::LoadStatus::Pending).
    ///
    /// A failed load keeps the index where the navigation put it.
    pub fn finish_load(&self, result: std::result::Result<ContentViewer, LoadError>) -> Result<()> {
        self.registry.with_history(self.id, |h, _, _| h.finish_load(result))
    }

    /// Abandons the load in flight. Returns whether there was one.
    pub fn stop(&self) -> bool {
        self.registry
            .with_history(self.id, |h, _, _| Ok(h.stop()))
            .unwrap_or(false)
    }

    /// Removes the entry at `index` if it loads the same document as its
    /// successor (`keep_next`) or predecessor. Returns whether it was removed.
    pub fn remove_duplicate(&self, index: usize, keep_next: bool) -> Result<bool> {
        self.registry
            .with_history(self.id, |h, _, _| h.remove_duplicate(index, keep_next))
    }

    /// Removes a range of entries not containing the current one. Returns the
    /// number of entries removed, including a collapsed duplicate.
    pub fn remove_entries(&self, range: Range<usize>) -> Result<usize> {
        self.registry.with_history(self.id, |h, _, _| h.remove_entries(range))
    }

    pub fn replace_entry(&self, index: usize, entry: Entry) -> Result<()> {
        self.registry
            .with_history(self.id, |h, _, _| h.replace_entry(index, entry))
    }

    /// Drops the `count` oldest entries.
    pub fn purge_history(&self, count: usize) -> Result<usize> {
        self.registry.with_history(self.id, |h, _, _| Ok(h.purge(count)))
    }

    pub fn evict_all_content_viewers(&self) -> Result<usize> {
        self.registry
            .with_history(self.id, |h, _, _| Ok(h.evict_all(EvictionReason::Explicit)))
    }

    /// Evicts cached viewers farther than the safe radius from `index`.
    pub fn evict_out_of_range_viewers(&self, index: usize) -> Result<usize> {
        self.registry
            .with_history(self.id, |h, settings, _| Ok(h.evict_out_of_range(index, settings.safe_radius)))
    }

    /// Marks this history as one part of a longer, split history.
    pub fn set_partial(&self, global_index_offset: usize, entries_after: usize) -> Result<()> {
        self.registry.with_history(self.id, |h, _, _| {
            h.set_partial(global_index_offset, entries_after);
            Ok(())
        })
    }

    pub fn global_count(&self) -> usize {
        self.registry.inspect(self.id, |h| h.global_count()).unwrap_or(0)
    }

    pub fn global_index(&self) -> i64 {
        self.registry.inspect(self.id, |h| h.global_index()).unwrap_or(-1)
    }

    pub fn goto_global_index(&self, global_index: usize) -> Result<()> {
        self.registry.with_history(self.id, |h, settings, stamp| {
            h.goto_global_index(global_index, settings, stamp)
        })
    }

    pub fn add_listener(&self, listener: &Rc<dyn HistoryListener>) -> Result<()> {
        let weak = Rc::downgrade(listener);
        self.registry.with_history(self.id, |h, _, _| {
            h.listeners_mut().add(weak);
            Ok(())
        })
    }

    pub fn remove_listener(&self, listener: &Rc<dyn HistoryListener>) -> Result<()> {
        self.registry.with_history(self.id, |h, _, _| {
            h.listeners_mut().remove(listener);
            Ok(())
        })
    }

    /// Waits out every asynchronous viewer teardown started by this history.
    pub fn flush_teardown(&self) -> Result<()> {
        self.registry.with_history(self.id, |h, _, _| {
            h.flush_teardown();
            Ok(())
        })
    }
}

impl Drop for SessionHistory {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for SessionHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHistory")
            .field("id", &self.id)
            .field("count", &self.count())
            .field("index", &self.index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FixedMemory, SimulatedLoader};
    use crate::session::{HistoryEvent, HistorySettings};
    use crate::timer::ManualScheduler;
    use std::cell::RefCell;
    use url::Url;

    fn registry(settings: HistorySettings) -> HistoryRegistry {
        HistoryRegistry::new(settings, Rc::new(ManualScheduler::new()), Rc::new(FixedMemory(1024))).unwrap()
    }

    fn page(path: &str) -> Entry {
        Entry::new(Url::parse(&format!("https://example.com/{}", path)).unwrap())
    }

    fn visit(history: &SessionHistory, paths: &[&str]) {
        for path in paths {
            history.navigate(page(path), LoadType::Normal).unwrap();
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<HistoryEvent>>);

    impl HistoryListener for Recorder {
        fn on_history_event(&self, _history: HistoryId, event: &HistoryEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn test_navigate_and_go_back() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        assert_eq!(history.index(), -1);

        visit(&history, &["a", "b", "c"]);
        assert_eq!(history.count(), 3);
        assert_eq!(history.index(), 2);
        assert_eq!(history.cached_indices(), vec![0, 1]);

        history.go_back().unwrap();
        assert_eq!(history.index(), 1);
        assert_eq!(history.cached_indices(), vec![0, 2]);
        assert!(loader.loads().last().unwrap().restored);
    }

    #[test]
    fn test_goto_out_of_range() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a"]);

        assert!(matches!(history.goto_index(5), Err(HistoryError::InvalidArgument(_))));
        assert!(matches!(history.go_back(), Err(HistoryError::InvalidArgument(_))));
        assert_eq!(history.index(), 0);
    }

    #[test]
    fn test_goto_current_is_noop() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a", "b"]);
        let loads = loader.loads().len();

        history.goto_index(1).unwrap();
        assert_eq!(loader.loads().len(), loads);
    }

    #[test]
    fn test_pending_rejects_navigation() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a"]);

        loader.set_deferred(true);
        history.navigate(page("b"), LoadType::Link).unwrap();
        assert_eq!(history.requested_index(), Some(1));

        let result = history.navigate(page("c"), LoadType::Link);
        assert!(matches!(result, Err(HistoryError::Pending { requested: 1 })));
        assert_eq!(history.count(), 2);

        let viewer = loader.new_viewer(&Url::parse("https://example.com/b").unwrap());
        let id = viewer.id();
        history.finish_load(Ok(viewer)).unwrap();
        assert!(!history.is_pending());
        assert_eq!(history.current_viewer_id(), Some(id));
    }

    #[test]
    fn test_redirect_supersedes_pending_load() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a"]);

        loader.set_deferred(true);
        history.navigate(page("b"), LoadType::Link).unwrap();
        history.navigate(page("b2"), LoadType::Redirect).unwrap();

        assert_eq!(history.count(), 2);
        assert_eq!(history.entry_at(1).unwrap().url().path(), "/b2");
        assert_eq!(history.requested_index(), Some(1));
    }

    #[test]
    fn test_finish_load_without_pending() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a"]);

        let viewer = loader.new_viewer(&Url::parse("https://example.com/x").unwrap());
        let id = viewer.id();
        assert!(matches!(history.finish_load(Ok(viewer)), Err(HistoryError::Unexpected(_))));
        assert!(loader.destroyed().contains(&id));
    }

    #[test]
    fn test_stop_clears_pending() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        loader.set_deferred(true);
        let history = SessionHistory::new(&registry, &loader).unwrap();
        history.navigate(page("a"), LoadType::Normal).unwrap();

        assert!(history.stop());
        assert!(!history.stop());
        history.navigate(page("b"), LoadType::Normal).unwrap();
    }

    #[test]
    fn test_listener_sees_events_in_order() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        let recorder = Rc::new(Recorder::default());
        let listener: Rc<dyn HistoryListener> = recorder.clone();
        history.add_listener(&listener).unwrap();

        visit(&history, &["a"]);
        let events = recorder.0.borrow().clone();
        assert!(matches!(events[0], HistoryEvent::NewEntry { index: 0, .. }));
        assert_eq!(events[1], HistoryEvent::LengthChanged { len: 1 });
        assert_eq!(events[2], HistoryEvent::NavigationComplete { index: 0, restored: false });

        history.remove_listener(&listener).unwrap();
        visit(&history, &["b"]);
        assert_eq!(recorder.0.borrow().len(), 3);
    }

    #[test]
    fn test_remove_entries_collapses_seam_duplicate() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a", "x", "a", "b"]);

        let removed = history.remove_entries(1..2).unwrap();
        assert_eq!(removed, 2);
        let paths: Vec<String> = history.entries().iter().map(|e| e.url().path().to_string()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(history.index(), 1);

        assert!(matches!(history.remove_entries(0..2), Err(HistoryError::InvalidArgument(_))));
    }

    #[test]
    fn test_remove_entries_reports_final_length_once() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a", "x", "a", "b"]);
        let recorder = Rc::new(Recorder::default());
        let listener: Rc<dyn HistoryListener> = recorder.clone();
        history.add_listener(&listener).unwrap();

        assert_eq!(history.remove_entries(1..2).unwrap(), 2);
        let lengths: Vec<HistoryEvent> = recorder
            .0
            .borrow()
            .iter()
            .filter(|e| matches!(e, HistoryEvent::LengthChanged { .. }))
            .cloned()
            .collect();
        assert_eq!(lengths, vec![HistoryEvent::LengthChanged { len: 2 }]);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        visit(&history, &["a", "b"]);
        assert_eq!(registry.history_count(), 1);
        assert_eq!(registry.total_cached_viewers(), 1);

        drop(history);
        assert_eq!(registry.history_count(), 0);
        assert_eq!(registry.total_cached_viewers(), 0);
        assert_eq!(loader.destroyed().len(), 2);
    }

    #[test]
    fn test_loader_gone() {
        let registry = registry(HistorySettings::default());
        let loader = Rc::new(SimulatedLoader::new());
        let history = SessionHistory::new(&registry, &loader).unwrap();
        drop(loader);

        let result = history.navigate(page("a"), LoadType::Normal);
        assert!(matches!(result, Err(HistoryError::Unexpected(_))));
        assert_eq!(history.count(), 0);
    }
}
