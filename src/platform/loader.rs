use super::viewer::{ContentViewer, Teardown};
use crate::session::Entry;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Load aborted")]
    Aborted,
}

/// How a navigation was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// Typed URL or programmatic navigation
    Normal,
    /// Link click
    Link,
    /// Replaces the current entry (`location.replace`)
    Replace,
    Reload,
    /// Server or meta redirect of the current load
    Redirect,
    /// Traversal of existing history (back, forward, goto)
    History,
}

impl LoadType {
    /// Whether the navigation overwrites the current entry instead of adding one
    pub fn replaces_current(self) -> bool {
        matches!(self, LoadType::Replace | LoadType::Reload | LoadType::Redirect)
    }
}

/// A request handed to the root navigation container
#[derive(Debug)]
pub struct LoadRequest<'a> {
    pub entry: &'a Entry,
    pub load_type: LoadType,
    /// Viewer restored from the back/forward cache, if the entry was heavy
    pub cached_viewer: Option<ContentViewer>,
}

#[derive(Debug)]
pub enum LoadStatus {
    /// The document is displayed; here is its live viewer
    Complete(ContentViewer),
    /// The load continues asynchronously; report it via `SessionHistory::finish_load`
    Pending,
}

/// The navigation container that loads documents and owns their teardown.
///
/// Methods are called while the owning registry is borrowed; implementations
/// must not call back into a session history. Report asynchronous completion
/// later through `SessionHistory::finish_load`.
pub trait ViewerLoader {
    fn load(&self, request: LoadRequest<'_>) -> Result<LoadStatus, LoadError>;

    /// Whether the document currently displayed for `entry` may enter the bfcache
    fn can_cache(&self, entry: &Entry) -> bool;

    fn destroy_viewer(&self, viewer: &mut ContentViewer) -> Teardown;

    /// Blocks until every draining teardown has completed.
    fn flush_teardown(&self) {}

    fn is_same_document(&self, a: &Entry, b: &Entry) -> bool {
        a.url() == b.url() && a.doc_identifier() == b.doc_identifier()
    }
}
