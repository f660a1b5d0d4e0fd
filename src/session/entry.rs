use crate::platform::ContentViewer;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// One navigation point in a session history.
///
/// An entry without a cached viewer is light and kept indefinitely. While it
/// holds a viewer it is heavy and subject to bfcache eviction.
#[derive(Debug)]
pub struct Entry {
    id: EntryId,
    url: Url,
    title: String,
    /// Serialized page state (scroll position, form data), opaque to history
    page_state: Option<Vec<u8>>,
    /// Identifies the loaded document; 0 means "same URL, same document"
    doc_identifier: u64,
    persist: bool,
    viewer: Option<ContentViewer>,
    /// Registry clock value when the viewer was last cached or used
    last_touched: u64,
}

impl Entry {
    pub fn new(url: Url) -> Self {
        Self {
            id: EntryId::next(),
            url,
            title: String::new(),
            page_state: None,
            doc_identifier: 0,
            persist: true,
            viewer: None,
            last_touched: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_page_state(mut self, state: Vec<u8>) -> Self {
        self.page_state = Some(state);
        self
    }

    pub fn with_doc_identifier(mut self, doc_identifier: u64) -> Self {
        self.doc_identifier = doc_identifier;
        self
    }

    /// Marks the entry as transient: the next navigation overwrites it.
    pub fn non_persistent(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn page_state(&self) -> Option<&[u8]> {
        self.page_state.as_deref()
    }

    pub fn doc_identifier(&self) -> u64 {
        self.doc_identifier
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    pub fn is_heavy(&self) -> bool {
        self.viewer.is_some()
    }

    pub fn viewer(&self) -> Option<&ContentViewer> {
        self.viewer.as_ref()
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched
    }

    /// Copy of this entry without its cached viewer
    pub fn clone_light(&self) -> Self {
        Self {
            id: self.id,
            url: self.url.clone(),
            title: self.title.clone(),
            page_state: self.page_state.clone(),
            doc_identifier: self.doc_identifier,
            persist: self.persist,
            viewer: None,
            last_touched: self.last_touched,
        }
    }

    pub(crate) fn set_viewer(&mut self, viewer: ContentViewer, touched: u64) -> Option<ContentViewer> {
        self.last_touched = touched;
        self.viewer.replace(viewer)
    }

    /// Gives the entry a fresh identity; used when a copy re-enters a list
    /// that still holds the original.
    pub(crate) fn renew_id(&mut self) {
        self.id = EntryId::next();
    }

    pub(crate) fn take_viewer(&mut self) -> Option<ContentViewer> {
        self.viewer.take()
    }

    pub(crate) fn touch(&mut self, touched: u64) {
        self.last_touched = touched;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ViewerId;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Entry::new(url("https://example.com/"));
        let b = Entry::new(url("https://example.com/"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_heavy_and_light() {
        let mut entry = Entry::new(url("https://example.com/a"));
        assert!(!entry.is_heavy());

        let viewer = ContentViewer::new(ViewerId(9), entry.url().clone());
        assert!(entry.set_viewer(viewer, 5).is_none());
        assert!(entry.is_heavy());
        assert_eq!(entry.last_touched(), 5);

        let light = entry.clone_light();
        assert_eq!(light.id(), entry.id());
        assert!(!light.is_heavy());

        assert_eq!(entry.take_viewer().map(|v| v.id()), Some(ViewerId(9)));
        assert!(!entry.is_heavy());
        assert!(entry.take_viewer().is_none());
    }

    #[test]
    fn test_builder() {
        let entry = Entry::new(url("https://example.com/form"))
            .with_title("Form")
            .with_page_state(vec![1, 2, 3])
            .with_doc_identifier(77)
            .non_persistent();

        assert_eq!(entry.title(), "Form");
        assert_eq!(entry.page_state(), Some(&[1u8, 2, 3][..]));
        assert_eq!(entry.doc_identifier(), 77);
        assert!(!entry.persist());
    }
}
