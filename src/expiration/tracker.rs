use crate::timer::{Scheduler, TimerId};
use std::collections::{HashMap, TryReserveError};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

pub const DEFAULT_GENERATIONS: usize = 3;

/// Receives keys that aged out of the tracker.
pub trait ExpirationHandler<K> {
    type Error: fmt::Display;

    /// Called exactly once per expiry. The key has already left the tracker.
    fn notify_expired(&mut self, key: K) -> Result<(), Self::Error>;
}

/// Generational aging of tracked keys.
///
/// Keys live in one of `GENERATIONS` buckets. Each timer tick reaps the oldest
/// bucket and makes it the newest one, so a key that is not marked used again is
/// expired after `GENERATIONS - 1` to `GENERATIONS` ticks. With a tick period of
/// `timeout / (GENERATIONS - 1)` that is between `timeout` and
/// `timeout * GENERATIONS / (GENERATIONS - 1)` after its last use.
///
/// The tracker does not call back into its owner directly: the recurring timer
/// invokes `on_tick`, and the owner then calls [`ExpirationTracker::age_one_generation`]
/// with a handler borrowing whatever state eviction needs. The timer only runs
/// while something is tracked.
pub struct ExpirationTracker<K, const GENERATIONS: usize = DEFAULT_GENERATIONS> {
    name: &'static str,
    period: Duration,
    generations: [Vec<K>; GENERATIONS],
    /// key -> (generation, slot within generation)
    locations: HashMap<K, (usize, usize)>,
    newest: usize,
    scheduler: Rc<dyn Scheduler>,
    on_tick: Rc<dyn Fn()>,
    timer: Option<TimerId>,
}

impl<K, const GENERATIONS: usize> ExpirationTracker<K, GENERATIONS>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(
        timeout: Duration,
        name: &'static str,
        scheduler: Rc<dyn Scheduler>,
        on_tick: Rc<dyn Fn()>,
    ) -> Self {
        assert!(GENERATIONS >= 2, "expiration tracker needs at least two generations");
        Self {
            name,
            period: timeout / (GENERATIONS as u32 - 1),
            generations: std::array::from_fn(|_| Vec::new()),
            locations: HashMap::new(),
            newest: 0,
            scheduler,
            on_tick,
            timer: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.locations.contains_key(key)
    }

    pub fn timer_active(&self) -> bool {
        self.timer.is_some()
    }

    /// Starts tracking `key` in the newest generation; an already tracked key is marked used.
    pub fn add(&mut self, key: K) -> Result<(), TryReserveError> {
        if self.contains(&key) {
            self.mark_used(&key);
            return Ok(());
        }

        self.locations.try_reserve(1)?;
        let bucket = &mut self.generations[self.newest];
        bucket.try_reserve(1)?;
        bucket.push(key.clone());
        self.locations.insert(key, (self.newest, bucket.len() - 1));

        self.ensure_timer();
        Ok(())
    }

    /// Stops tracking `key`. Returns false if it was not tracked.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some((generation, slot)) = self.locations.remove(key) else {
            return false;
        };
        self.detach(generation, slot);

        if self.is_empty() {
            self.stop_timer();
        }
        true
    }

    /// Moves a tracked key to the newest generation, restarting its countdown.
    pub fn mark_used(&mut self, key: &K) -> bool {
        let Some(&(generation, slot)) = self.locations.get(key) else {
            return false;
        };
        if generation == self.newest {
            return true;
        }

        self.detach(generation, slot);
        let bucket = &mut self.generations[self.newest];
        bucket.push(key.clone());
        let location = (self.newest, bucket.len() - 1);
        self.locations.insert(key.clone(), location);
        true
    }

    /// Reaps the oldest generation, handing every key in it to `handler`.
    ///
    /// Handler failures are logged and do not stop the pass. Returns the number
    /// of expired keys.
    pub fn age_one_generation<H>(&mut self, handler: &mut H) -> usize
    where
        H: ExpirationHandler<K> + ?Sized,
    {
        let reap = (self.newest + 1) % GENERATIONS;
        let expired = std::mem::take(&mut self.generations[reap]);
        for key in &expired {
            self.locations.remove(key);
        }
        self.newest = reap;

        let count = expired.len();
        for key in expired {
            let label = format!("{:?}", key);
            if let Err(e) = handler.notify_expired(key) {
                log::warn!("{}: expiring {} failed: {}", self.name, label, e);
            }
        }

        if count > 0 {
            log::debug!("{}: aged out {} object(s), {} still tracked", self.name, count, self.len());
        }
        if self.is_empty() {
            self.stop_timer();
        }
        count
    }

    /// Expires everything at once, oldest generation first.
    pub fn age_all<H>(&mut self, handler: &mut H) -> usize
    where
        H: ExpirationHandler<K> + ?Sized,
    {
        let mut total = 0;
        for _ in 0..GENERATIONS {
            total += self.age_one_generation(handler);
        }
        total
    }

    /// Forgets every key without notifying and stops the timer.
    pub fn clear(&mut self) {
        for bucket in &mut self.generations {
            bucket.clear();
        }
        self.locations.clear();
        self.stop_timer();
    }

    fn detach(&mut self, generation: usize, slot: usize) {
        let bucket = &mut self.generations[generation];
        bucket.swap_remove(slot);
        if let Some(moved) = bucket.get(slot) {
            if let Some(location) = self.locations.get_mut(moved) {
                location.1 = slot;
            }
        }
    }

    fn ensure_timer(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let on_tick = self.on_tick.clone();
        let id = self
            .scheduler
            .schedule_recurring(self.period, Box::new(move || (*on_tick)()));
        log::debug!("{}: aging timer started, period {:?}", self.name, self.period);
        self.timer = Some(id);
    }

    fn stop_timer(&mut self) {
        if let Some(id) = self.timer.take() {
            self.scheduler.cancel(id);
            log::debug!("{}: aging timer stopped", self.name);
        }
    }
}

impl<K, const GENERATIONS: usize> Drop for ExpirationTracker<K, GENERATIONS> {
    fn drop(&mut self) {
        if let Some(id) = self.timer.take() {
            self.scheduler.cancel(id);
        }
    }
}
