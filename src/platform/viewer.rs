use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

/// A live rendered document kept alive so that history navigation can restore it.
///
/// Viewers are not `Clone`: a viewer is owned by exactly one place at a time
/// (the history's live slot, one cached entry, or the teardown queue).
#[derive(Debug)]
pub struct ContentViewer {
    id: ViewerId,
    url: Url,
}

impl ContentViewer {
    pub fn new(id: ViewerId, url: Url) -> Self {
        Self { id, url }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Completion signal for a viewer whose teardown was handed off to another thread
#[derive(Clone, Debug)]
pub struct TeardownToken {
    completed: Arc<AtomicBool>,
}

impl TeardownToken {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for TeardownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of asking the loader to destroy a viewer
#[derive(Debug, Clone)]
pub enum Teardown {
    /// The viewer is fully torn down and may be freed
    Complete,
    /// Teardown is still draining elsewhere; keep the viewer until the token completes
    Draining(TeardownToken),
}
