//! In-process navigation container that fabricates viewers instead of
//! rendering documents. Drives the CLI and the test suites.

use super::loader::{LoadError, LoadRequest, LoadStatus, LoadType, ViewerLoader};
use super::viewer::{ContentViewer, Teardown, TeardownToken, ViewerId};
use crate::session::Entry;
use std::cell::{Cell, RefCell};
use url::Url;

/// One load observed by the simulated container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRecord {
    pub url: Url,
    pub load_type: LoadType,
    pub restored: bool,
}

#[derive(Debug, Default)]
pub struct SimulatedLoader {
    next_viewer: Cell<u64>,
    deferred: Cell<bool>,
    async_teardown: Cell<bool>,
    fail_next: RefCell<Option<LoadError>>,
    /// URL substrings whose documents refuse the bfcache (e.g. `no-store`)
    uncacheable: RefCell<Vec<String>>,
    destroyed: RefCell<Vec<ViewerId>>,
    draining: RefCell<Vec<TeardownToken>>,
    /// Viewers dropped by a failed restore, kept until their teardown drains
    parked: RefCell<Vec<(ContentViewer, TeardownToken)>>,
    loads: RefCell<Vec<LoadRecord>>,
}

impl SimulatedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh loads report `LoadStatus::Pending` until finished by the caller
    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.set(deferred);
    }

    /// Teardown hands off to a pretend paint thread and drains asynchronously
    pub fn set_async_teardown(&self, enabled: bool) {
        self.async_teardown.set(enabled);
    }

    pub fn fail_next_load(&self, error: LoadError) {
        *self.fail_next.borrow_mut() = Some(error);
    }

    pub fn refuse_caching(&self, url_fragment: impl Into<String>) {
        self.uncacheable.borrow_mut().push(url_fragment.into());
    }

    pub fn new_viewer(&self, url: &Url) -> ContentViewer {
        let id = self.next_viewer.get() + 1;
        self.next_viewer.set(id);
        ContentViewer::new(ViewerId(id), url.clone())
    }

    /// Viewers whose teardown has started, in order
    pub fn destroyed(&self) -> Vec<ViewerId> {
        self.destroyed.borrow().clone()
    }

    pub fn loads(&self) -> Vec<LoadRecord> {
        self.loads.borrow().clone()
    }

    pub fn pending_teardowns(&self) -> usize {
        self.draining
            .borrow()
            .iter()
            .filter(|token| !token.is_complete())
            .count()
    }

    pub fn parked_viewers(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Reports completion of every draining teardown
    pub fn complete_teardowns(&self) {
        for token in self.draining.borrow_mut().drain(..) {
            token.complete();
        }
        self.parked.borrow_mut().retain(|(_, token)| !token.is_complete());
    }
}

impl ViewerLoader for SimulatedLoader {
    fn load(&self, request: LoadRequest<'_>) -> Result<LoadStatus, LoadError> {
        let url = request.entry.url().clone();
        self.loads.borrow_mut().push(LoadRecord {
            url: url.clone(),
            load_type: request.load_type,
            restored: request.cached_viewer.is_some(),
        });

        if let Some(error) = self.fail_next.borrow_mut().take() {
            if let Some(mut viewer) = request.cached_viewer {
                if let Teardown::Draining(token) = self.destroy_viewer(&mut viewer) {
                    self.parked.borrow_mut().push((viewer, token));
                }
            }
            return Err(error);
        }

        if let Some(viewer) = request.cached_viewer {
            return Ok(LoadStatus::Complete(viewer));
        }

        if self.deferred.get() {
            Ok(LoadStatus::Pending)
        } else {
            Ok(LoadStatus::Complete(self.new_viewer(&url)))
        }
    }

    fn can_cache(&self, entry: &Entry) -> bool {
        let url = entry.url().as_str();
        !self
            .uncacheable
            .borrow()
            .iter()
            .any(|fragment| url.contains(fragment.as_str()))
    }

    fn destroy_viewer(&self, viewer: &mut ContentViewer) -> Teardown {
        self.destroyed.borrow_mut().push(viewer.id());
        if self.async_teardown.get() {
            let token = TeardownToken::new();
            self.draining.borrow_mut().push(token.clone());
            Teardown::Draining(token)
        } else {
            Teardown::Complete
        }
    }

    fn flush_teardown(&self) {
        self.complete_teardowns();
    }
}
