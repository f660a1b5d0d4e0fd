use super::entry::{Entry, EntryId};
use crate::error::{HistoryError, Result};
use std::ops::Range;

/// Ordered navigation stack with a current position.
///
/// `current_index` is `None` exactly when the list is empty.
#[derive(Debug, Default)]
pub struct TransactionList {
    entries: Vec<Entry>,
    current_index: Option<usize>,
}

impl TransactionList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current_index: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Current index, or -1 for an empty list
    pub fn index(&self) -> i32 {
        self.current_index.map(|i| i as i32).unwrap_or(-1)
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.entries.get_mut(index)
    }

    pub fn current(&self) -> Option<&Entry> {
        self.current_index.and_then(|i| self.entries.get(i))
    }

    pub fn current_mut(&mut self) -> Option<&mut Entry> {
        self.current_index.and_then(|i| self.entries.get_mut(i))
    }

    pub fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut()
    }

    pub fn can_go_back(&self) -> bool {
        self.current_index.map(|i| i > 0).unwrap_or(false)
    }

    pub fn can_go_forward(&self) -> bool {
        self.current_index
            .map(|i| i + 1 < self.entries.len())
            .unwrap_or(false)
    }

    pub fn set_index(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            return Err(HistoryError::index_out_of_range(index as i64, self.entries.len()));
        }
        self.current_index = Some(index);
        Ok(())
    }

    /// Adds `entry` at the current position.
    ///
    /// Without `replace`, everything after the current index is truncated and
    /// the entry is appended as the new current entry. With `replace`, or when
    /// the current entry is not persistent, the current entry is overwritten.
    /// Returns the displaced entries.
    pub fn add(&mut self, mut entry: Entry, replace: bool) -> Result<Vec<Entry>> {
        self.make_unique(&mut entry);
        let Some(index) = self.current_index else {
            if !self.entries.is_empty() {
                return Err(HistoryError::unexpected("non-empty transaction list without a current index"));
            }
            self.entries.try_reserve(1)?;
            self.entries.push(entry);
            self.current_index = Some(0);
            return Ok(Vec::new());
        };

        let current = self
            .entries
            .get(index)
            .ok_or_else(|| HistoryError::unexpected(format!("current index {} beyond {} entries", index, self.entries.len())))?;

        if replace || !current.persist() {
            let displaced = std::mem::replace(&mut self.entries[index], entry);
            return Ok(vec![displaced]);
        }

        self.entries.try_reserve(1)?;
        let truncated: Vec<Entry> = self.entries.drain(index + 1..).collect();
        self.entries.push(entry);
        self.current_index = Some(index + 1);
        Ok(truncated)
    }

    /// Overwrites the entry at `index`, returning the old one.
    pub fn replace_at(&mut self, index: usize, mut entry: Entry) -> Result<Entry> {
        self.make_unique(&mut entry);
        let len = self.entries.len();
        let slot = self
            .entries
            .get_mut(index)
            .ok_or_else(|| HistoryError::index_out_of_range(index as i64, len))?;
        Ok(std::mem::replace(slot, entry))
    }

    /// Removes `range`, keeping the current index on the same entry when it
    /// survives, or on the entry that took its place when it does not.
    pub fn remove_range(&mut self, range: Range<usize>) -> Result<Vec<Entry>> {
        if range.start > range.end || range.end > self.entries.len() {
            return Err(HistoryError::InvalidArgument(format!(
                "range {:?} out of bounds for {} entries",
                range,
                self.entries.len()
            )));
        }

        let removed_count = range.len();
        let removed: Vec<Entry> = self.entries.drain(range.clone()).collect();

        self.current_index = match self.current_index {
            _ if self.entries.is_empty() => None,
            Some(i) if i >= range.end => Some(i - removed_count),
            Some(i) if i >= range.start => Some(range.start.min(self.entries.len() - 1)),
            other => other,
        };
        Ok(removed)
    }

    /// Removes the `count` oldest entries.
    pub fn purge(&mut self, count: usize) -> Vec<Entry> {
        let count = count.min(self.entries.len());
        let removed: Vec<Entry> = self.entries.drain(..count).collect();
        self.current_index = match self.current_index {
            _ if self.entries.is_empty() => None,
            Some(i) => Some(i.saturating_sub(count)),
            None => None,
        };
        removed
    }

    /// Compares the entry at `index` with its successor (`keep_next`) or its
    /// predecessor and removes the entry at `index` if `same` says they load the
    /// same document. `index` must not be the current index.
    pub fn remove_duplicate<F>(&mut self, index: usize, keep_next: bool, same: F) -> Result<Option<Entry>>
    where
        F: Fn(&Entry, &Entry) -> bool,
    {
        let len = self.entries.len();
        if index >= len {
            return Err(HistoryError::index_out_of_range(index as i64, len));
        }
        if self.current_index == Some(index) {
            return Err(HistoryError::InvalidArgument(format!(
                "cannot collapse the current entry at {}",
                index
            )));
        }

        let compare = if keep_next { index + 1 } else { index.wrapping_sub(1) };
        let Some(neighbor) = self.entries.get(compare) else {
            return Ok(None);
        };
        if !same(&self.entries[index], neighbor) {
            return Ok(None);
        }

        let removed = self.entries.remove(index);
        if let Some(current) = self.current_index {
            if current > index {
                self.current_index = Some(current - 1);
            }
        }
        Ok(Some(removed))
    }

    /// Ids are looked up by position, so no two entries may share one.
    fn make_unique(&self, entry: &mut Entry) {
        if self.position(entry.id()).is_some() {
            entry.renew_id();
        }
    }

    /// Empties the list, returning every entry.
    pub fn clear(&mut self) -> Vec<Entry> {
        self.current_index = None;
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn entry(path: &str) -> Entry {
        Entry::new(Url::parse(&format!("https://example.com/{}", path)).unwrap())
    }

    fn list_of(paths: &[&str]) -> TransactionList {
        let mut list = TransactionList::new();
        for path in paths {
            list.add(entry(path), false).unwrap();
        }
        list
    }

    fn paths(list: &TransactionList) -> Vec<String> {
        list.iter().map(|e| e.url().path().trim_start_matches('/').to_string()).collect()
    }

    #[test]
    fn test_history_navigation() {
        let mut list = list_of(&["", "page1", "page2"]);

        assert_eq!(list.index(), 2);
        assert!(list.can_go_back());
        assert!(!list.can_go_forward());

        list.set_index(1).unwrap();
        assert_eq!(list.current().unwrap().url().path(), "/page1");

        list.set_index(0).unwrap();
        assert!(!list.can_go_back());
        assert!(list.can_go_forward());

        assert!(matches!(list.set_index(3), Err(HistoryError::InvalidArgument(_))));
        assert_eq!(list.index(), 0);
    }

    #[test]
    fn test_empty_list_index() {
        let list = TransactionList::new();
        assert_eq!(list.index(), -1);
        assert!(list.current().is_none());
        assert!(!list.can_go_back());
        assert!(!list.can_go_forward());
    }

    #[test]
    fn test_add_truncates_forward_entries() {
        let mut list = list_of(&["a", "b", "c"]);
        list.set_index(1).unwrap();

        let displaced = list.add(entry("d"), false).unwrap();
        assert_eq!(paths(&list), vec!["a", "b", "d"]);
        assert_eq!(list.index(), 2);
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].url().path(), "/c");
    }

    #[test]
    fn test_add_replace_overwrites_current() {
        let mut list = list_of(&["a", "b", "c"]);
        list.set_index(1).unwrap();

        let displaced = list.add(entry("x"), true).unwrap();
        assert_eq!(paths(&list), vec!["a", "x", "c"]);
        assert_eq!(list.index(), 1);
        assert_eq!(displaced[0].url().path(), "/b");
    }

    #[test]
    fn test_non_persistent_entry_is_overwritten() {
        let mut list = list_of(&["a"]);
        list.add(entry("error").non_persistent(), false).unwrap();
        list.add(entry("b"), false).unwrap();

        assert_eq!(paths(&list), vec!["a", "b"]);
        assert_eq!(list.index(), 1);
    }

    #[test]
    fn test_remove_range_adjusts_index() {
        let mut list = list_of(&["a", "b", "c", "d", "e"]);
        list.set_index(3).unwrap();

        let removed = list.remove_range(0..2).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(paths(&list), vec!["c", "d", "e"]);
        assert_eq!(list.current().unwrap().url().path(), "/d");

        // Removing entries after the current one leaves the index alone
        list.remove_range(2..3).unwrap();
        assert_eq!(list.index(), 1);

        assert!(list.remove_range(1..5).is_err());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_range_including_current() {
        let mut list = list_of(&["a", "b", "c"]);
        list.remove_range(1..3).unwrap();
        assert_eq!(list.index(), 0);

        list.remove_range(0..1).unwrap();
        assert_eq!(list.index(), -1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_purge_oldest() {
        let mut list = list_of(&["a", "b", "c", "d"]);
        let purged = list.purge(2);
        assert_eq!(purged.len(), 2);
        assert_eq!(paths(&list), vec!["c", "d"]);
        assert_eq!(list.index(), 1);

        list.set_index(0).unwrap();
        list.purge(1);
        assert_eq!(list.index(), 0);
        assert_eq!(paths(&list), vec!["d"]);

        list.purge(10);
        assert_eq!(list.index(), -1);
    }

    #[test]
    fn test_remove_duplicate_keep_next() {
        let mut list = list_of(&["a", "b", "b", "c"]);
        let same = |x: &Entry, y: &Entry| x.url() == y.url();

        let removed = list.remove_duplicate(1, true, same).unwrap();
        assert_eq!(removed.unwrap().url().path(), "/b");
        assert_eq!(paths(&list), vec!["a", "b", "c"]);
        assert_eq!(list.index(), 2);

        assert!(list.remove_duplicate(0, true, same).unwrap().is_none());
    }

    #[test]
    fn test_remove_duplicate_keep_previous() {
        let mut list = list_of(&["a", "a", "b"]);
        list.set_index(0).unwrap();
        let same = |x: &Entry, y: &Entry| x.url() == y.url();

        assert!(list.remove_duplicate(1, false, same).unwrap().is_some());
        assert_eq!(paths(&list), vec!["a", "b"]);
        assert_eq!(list.index(), 0);

        // No predecessor to compare against
        list.set_index(1).unwrap();
        assert!(list.remove_duplicate(0, false, same).unwrap().is_none());
    }

    #[test]
    fn test_copied_entry_gets_its_own_id() {
        let mut list = list_of(&["a"]);
        let copy = list.get(0).unwrap().clone_light();
        let original = list.get(0).unwrap().id();

        list.add(entry("b"), false).unwrap();
        list.add(copy, false).unwrap();
        assert_ne!(list.get(2).unwrap().id(), original);
        assert_eq!(list.position(original), Some(0));

        let copy = list.get(1).unwrap().clone_light();
        list.replace_at(0, copy).unwrap();
        let ids: Vec<EntryId> = list.iter().map(Entry::id).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_remove_duplicate_rejects_current() {
        let mut list = list_of(&["a", "a"]);
        let result = list.remove_duplicate(1, false, |x, y| x.url() == y.url());
        assert!(matches!(result, Err(HistoryError::InvalidArgument(_))));
        assert_eq!(list.len(), 2);
    }
}
