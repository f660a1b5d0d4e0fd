//! Property tests: random operation sequences never break history invariants.

use proptest::prelude::*;
use session_history::platform::{FixedMemory, LoadType, SimulatedLoader};
use session_history::timer::ManualScheduler;
use session_history::{Entry, HistoryRegistry, HistorySettings, SessionHistory};
use std::rc::Rc;
use std::time::Duration;
use url::Url;

const TABS: usize = 2;
const MAX_VIEWERS: usize = 3;
const SAFE_RADIUS: usize = 1;
const MAX_ENTRIES: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Navigate { tab: usize, page: u8, replace: bool },
    Back { tab: usize },
    Forward { tab: usize },
    Goto { tab: usize, index: usize },
    Reload { tab: usize },
    RemoveFirst { tab: usize },
    Purge { tab: usize, count: usize },
    Tick { ms: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    let tab = 0..TABS;
    prop_oneof![
        4 => (tab.clone(), 0u8..5, any::<bool>()).prop_map(|(tab, page, replace)| Op::Navigate { tab, page, replace }),
        2 => tab.clone().prop_map(|tab| Op::Back { tab }),
        1 => tab.clone().prop_map(|tab| Op::Forward { tab }),
        1 => (tab.clone(), 0usize..8).prop_map(|(tab, index)| Op::Goto { tab, index }),
        1 => tab.clone().prop_map(|tab| Op::Reload { tab }),
        1 => tab.clone().prop_map(|tab| Op::RemoveFirst { tab }),
        1 => (tab, 0usize..3).prop_map(|(tab, count)| Op::Purge { tab, count }),
        1 => (0u64..800).prop_map(|ms| Op::Tick { ms }),
    ]
}

fn apply(op: &Op, tabs: &[SessionHistory], scheduler: &ManualScheduler) {
    // Rejected operations are fine; only the invariants matter here.
    let _ = match *op {
        Op::Navigate { tab, page, replace } => {
            let url = Url::parse(&format!("https://p{}.test/", page)).unwrap();
            let load_type = if replace { LoadType::Replace } else { LoadType::Link };
            tabs[tab].navigate(Entry::new(url), load_type)
        }
        Op::Back { tab } => tabs[tab].go_back(),
        Op::Forward { tab } => tabs[tab].go_forward(),
        Op::Goto { tab, index } => tabs[tab].goto_index(index),
        Op::Reload { tab } => tabs[tab].reload(),
        Op::RemoveFirst { tab } => tabs[tab].remove_entries(0..1).map(|_| ()),
        Op::Purge { tab, count } => tabs[tab].purge_history(count).map(|_| ()),
        Op::Tick { ms } => {
            scheduler.advance(Duration::from_millis(ms));
            Ok(())
        }
    };
}

proptest! {
    #[test]
    fn test_invariants_hold_for_any_sequence(ops in prop::collection::vec(op(), 1..60)) {
        let scheduler = Rc::new(ManualScheduler::new());
        let settings = HistorySettings {
            max_total_viewers: MAX_VIEWERS as i32,
            safe_radius: SAFE_RADIUS,
            eviction_timeout_ms: 1000,
            max_entries: MAX_ENTRIES,
        };
        let registry = HistoryRegistry::new(settings, scheduler.clone(), Rc::new(FixedMemory(1024))).unwrap();
        let loaders: Vec<Rc<SimulatedLoader>> = (0..TABS).map(|_| Rc::new(SimulatedLoader::new())).collect();
        let tabs: Vec<SessionHistory> = loaders
            .iter()
            .map(|loader| SessionHistory::new(&registry, loader).unwrap())
            .collect();

        for op in &ops {
            apply(op, &tabs, &scheduler);

            prop_assert!(registry.total_cached_viewers() <= MAX_VIEWERS);
            for history in &tabs {
                let count = history.count();
                let index = history.index();
                prop_assert!(count <= MAX_ENTRIES);
                if count == 0 {
                    prop_assert_eq!(index, -1);
                } else {
                    prop_assert!(index >= 0 && (index as usize) < count);
                }

                let cached = history.cached_indices();
                prop_assert_eq!(cached.len(), history.tracked_count());
                for i in cached {
                    prop_assert!(i as i32 != index, "current entry holds a cached viewer");
                    prop_assert!((i as i32 - index).unsigned_abs() as usize <= SAFE_RADIUS);
                }
            }
        }

        drop(tabs);
        prop_assert_eq!(registry.total_cached_viewers(), 0);
        prop_assert_eq!(scheduler.active_timers(), 0);
    }
}
