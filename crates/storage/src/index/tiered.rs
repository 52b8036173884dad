//! Hot/warm/cold tiered index.
//!
//! Every live key resides in exactly one tier. The hot and warm tiers are
//! radix trees of full entries (location + frequency + last access); the
//! cold tier is an ordered map holding bare locations. A process-wide
//! frequency map, separate from the per-entry counters, lets cold keys
//! accumulate hits until they earn residency in a resident tier.
//!
//! Lock order is hot -> warm -> cold -> stats whenever more than one lock
//! is held. Helpers that move entries between tiers take the already-locked
//! tier contents as arguments so a single call path never re-locks.

use crate::index::radix::RadixTree;
use crate::index::Index;
use crate::Location;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Cold keys move up to warm after this many global hits.
const COLD_PROMOTE_HITS: u64 = 2;

/// Tuning for the tiered engine.
#[derive(Debug, Clone)]
pub struct TieredOptions {
    /// Hot tier capacity (entries).
    pub hot_capacity: usize,
    /// Warm tier capacity (entries).
    pub warm_capacity: usize,
    /// Global hits before a warm entry is promoted to hot.
    pub promote_threshold: u64,
    /// A full hot tier sheds entries whose tier frequency fell below this.
    pub demote_threshold: u64,
    /// Background maintenance tick.
    pub maintenance_interval: Duration,
}

impl Default for TieredOptions {
    fn default() -> Self {
        Self {
            hot_capacity: 10_000,
            warm_capacity: 100_000,
            promote_threshold: 10,
            demote_threshold: 5,
            maintenance_interval: Duration::from_secs(1),
        }
    }
}

/// One resident-tier entry. The same shape serves hot and warm.
#[derive(Debug, Clone)]
struct TierEntry {
    location: Location,
    frequency: u64,
    last_access: Instant,
}

struct TieredCore {
    opts: TieredOptions,
    hot: RwLock<RadixTree<TierEntry>>,
    warm: RwLock<RadixTree<TierEntry>>,
    cold: RwLock<BTreeMap<Vec<u8>, Location>>,
    stats: RwLock<HashMap<Vec<u8>, Arc<AtomicU64>>>,
}

/// The tiered index with its background maintenance worker.
pub struct TieredIndex {
    core: Arc<TieredCore>,
    worker: Mutex<Option<MaintenanceWorker>>,
}

struct MaintenanceWorker {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl std::fmt::Debug for TieredIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hot, warm, cold) = self.tier_sizes();
        f.debug_struct("TieredIndex")
            .field("hot", &hot)
            .field("warm", &warm)
            .field("cold", &cold)
            .finish()
    }
}

impl TieredIndex {
    pub fn new(opts: TieredOptions) -> Self {
        let interval = opts.maintenance_interval;
        let core = Arc::new(TieredCore {
            opts,
            hot: RwLock::new(RadixTree::new()),
            warm: RwLock::new(RadixTree::new()),
            cold: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(HashMap::new()),
        });

        let (stop, stop_rx) = mpsc::channel();
        let weak = Arc::downgrade(&core);
        let handle = thread::Builder::new()
            .name("tiered-maintenance".into())
            .spawn(move || maintenance_loop(weak, stop_rx, interval))
            .expect("spawn tiered-maintenance thread");

        Self {
            core,
            worker: Mutex::new(Some(MaintenanceWorker { stop, handle })),
        }
    }

    /// (hot, warm, cold) entry counts.
    pub fn tier_sizes(&self) -> (usize, usize, usize) {
        (
            self.core.hot.read().len(),
            self.core.warm.read().len(),
            self.core.cold.read().len(),
        )
    }

    /// One maintenance pass, same as the background worker performs each
    /// tick. Exposed so tests can drive it deterministically.
    pub fn run_maintenance(&self) {
        self.core.run_maintenance();
    }
}

impl Index for TieredIndex {
    fn put(&self, key: &[u8], location: Location) {
        self.core.put(key, location)
    }

    fn get(&self, key: &[u8]) -> Option<Location> {
        self.core.get(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.core.delete(key)
    }

    fn len(&self) -> usize {
        let (hot, warm, cold) = (
            self.core.hot.read().len(),
            self.core.warm.read().len(),
            self.core.cold.read().len(),
        );
        hot + warm + cold
    }

    fn close(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
        }
    }
}

impl Drop for TieredIndex {
    fn drop(&mut self) {
        self.close();
    }
}

fn maintenance_loop(core: Weak<TieredCore>, stop: mpsc::Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        let Some(core) = core.upgrade() else { return };
        core.run_maintenance();
    }
}

impl TieredCore {
    /// Bump the global counter for `key` and return the new value.
    fn bump_stats(&self, key: &[u8]) -> u64 {
        if let Some(counter) = self.stats.read().get(key) {
            return counter.fetch_add(1, Ordering::Relaxed) + 1;
        }
        let mut stats = self.stats.write();
        let counter = stats
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn clear_stats(&self, key: &[u8]) {
        self.stats.write().remove(key);
    }

    fn put(&self, key: &[u8], location: Location) {
        let global = self.bump_stats(key);

        {
            let mut hot = self.hot.write();
            if let Some(entry) = hot.get_mut(key) {
                entry.location = location;
                entry.frequency += 1;
                return;
            }
        }

        let in_warm = {
            let mut warm = self.warm.write();
            match warm.get_mut(key) {
                Some(entry) => {
                    entry.location = location;
                    entry.frequency += 1;
                    true
                }
                None => false,
            }
        };
        if in_warm {
            if global >= self.opts.promote_threshold {
                self.promote_to_hot(key);
            }
            return;
        }

        // New keys start cold and work their way up through accesses.
        self.cold.write().insert(key.to_vec(), location);
    }

    fn get(&self, key: &[u8]) -> Option<Location> {
        {
            let mut hot = self.hot.write();
            if let Some(entry) = hot.get_mut(key) {
                entry.frequency += 1;
                entry.last_access = Instant::now();
                let location = entry.location;
                drop(hot);
                self.bump_stats(key);
                return Some(location);
            }
        }

        let warm_hit = {
            let mut warm = self.warm.write();
            warm.get_mut(key).map(|entry| {
                entry.frequency += 1;
                entry.last_access = Instant::now();
                entry.location
            })
        };
        if let Some(location) = warm_hit {
            if self.bump_stats(key) >= self.opts.promote_threshold {
                self.promote_to_hot(key);
            }
            return Some(location);
        }

        let cold_hit = self.cold.read().get(key).copied();
        if let Some(location) = cold_hit {
            let global = self.bump_stats(key);
            if global >= COLD_PROMOTE_HITS {
                self.lift_from_cold(key, global);
            }
            return Some(location);
        }

        None
    }

    fn delete(&self, key: &[u8]) -> bool {
        let removed = self.hot.write().remove(key).is_some()
            || self.warm.write().remove(key).is_some()
            || self.cold.write().remove(key).is_some();
        self.clear_stats(key);
        removed
    }

    /// Move `key` from warm to hot, shedding a hot entry first if needed.
    /// Resets the global counter so re-promotion is earned from scratch.
    fn promote_to_hot(&self, key: &[u8]) {
        {
            let mut hot = self.hot.write();
            let mut warm = self.warm.write();
            let mut cold = self.cold.write();

            // A racing promoter may have moved the key already.
            let Some(entry) = warm.remove(key) else { return };
            if hot.len() >= self.opts.hot_capacity {
                demote_coldest_hot_entry(&self.opts, &mut hot, &mut warm, &mut cold);
            }
            hot.insert(
                key,
                TierEntry {
                    last_access: Instant::now(),
                    ..entry
                },
            );
        }
        self.clear_stats(key);
    }

    /// Move a cold entry into warm after it has earned enough global hits.
    fn lift_from_cold(&self, key: &[u8], global: u64) {
        let mut warm = self.warm.write();
        let mut cold = self.cold.write();

        let Some(location) = cold.remove(key) else { return };
        admit_into_warm(
            &self.opts,
            &mut warm,
            &mut cold,
            key.to_vec(),
            TierEntry {
                location,
                frequency: global,
                last_access: Instant::now(),
            },
        );
    }

    /// One pass of the background work: shed a cooled entry from a full hot
    /// tier, demote from any over-capacity tier, and drop global counters
    /// that no longer back a live key.
    fn run_maintenance(&self) {
        {
            let mut hot = self.hot.write();
            let mut warm = self.warm.write();
            let mut cold = self.cold.write();

            if hot.len() >= self.opts.hot_capacity && self.opts.hot_capacity > 0 {
                let cooled = min_frequency_key(&hot)
                    .filter(|(_, freq)| *freq < self.opts.demote_threshold);
                if hot.len() > self.opts.hot_capacity || cooled.is_some() {
                    demote_coldest_hot_entry(&self.opts, &mut hot, &mut warm, &mut cold);
                }
            }
            if warm.len() > self.opts.warm_capacity {
                demote_oldest_warm_entry(&mut warm, &mut cold);
            }
        }
        self.prune_stats();
    }

    /// Remove counters for keys that are not resident in any tier. A
    /// counter racing with an insert may be dropped and simply rebuilds on
    /// the next access; the stats are advisory.
    fn prune_stats(&self) {
        let dead: Vec<Vec<u8>> = {
            let stats = self.stats.read();
            if stats.is_empty() {
                return;
            }
            let hot = self.hot.read();
            let warm = self.warm.read();
            let cold = self.cold.read();
            stats
                .keys()
                .filter(|key| {
                    !hot.contains_key(*key) && !warm.contains_key(*key) && !cold.contains_key(*key)
                })
                .cloned()
                .collect()
        };

        if !dead.is_empty() {
            tracing::debug!(pruned = dead.len(), "dropping orphaned frequency counters");
            let mut stats = self.stats.write();
            for key in dead {
                stats.remove(&key);
            }
        }
    }
}

fn min_frequency_key(tier: &RadixTree<TierEntry>) -> Option<(Vec<u8>, u64)> {
    let mut victim: Option<(Vec<u8>, u64)> = None;
    tier.for_each(|key, entry| match &victim {
        Some((_, freq)) if entry.frequency >= *freq => {}
        _ => victim = Some((key.to_vec(), entry.frequency)),
    });
    victim
}

/// Demote the hot entry with the lowest tier frequency into warm, keeping
/// its frequency. Ties break on whichever the scan saw first.
fn demote_coldest_hot_entry(
    opts: &TieredOptions,
    hot: &mut RadixTree<TierEntry>,
    warm: &mut RadixTree<TierEntry>,
    cold: &mut BTreeMap<Vec<u8>, Location>,
) {
    let Some((key, _)) = min_frequency_key(hot) else {
        return;
    };
    let entry = hot.remove(&key).expect("victim resides in hot");
    admit_into_warm(opts, warm, cold, key, entry);
}

/// Insert into warm, first demoting the oldest warm entry to cold if warm
/// is at capacity. Keeps the warm tier within its hard bound.
fn admit_into_warm(
    opts: &TieredOptions,
    warm: &mut RadixTree<TierEntry>,
    cold: &mut BTreeMap<Vec<u8>, Location>,
    key: Vec<u8>,
    entry: TierEntry,
) {
    if warm.len() >= opts.warm_capacity {
        demote_oldest_warm_entry(warm, cold);
    }
    warm.insert(&key, entry);
}

/// Demote the least recently accessed warm entry to cold. The location is
/// retained; the frequency is discarded.
fn demote_oldest_warm_entry(
    warm: &mut RadixTree<TierEntry>,
    cold: &mut BTreeMap<Vec<u8>, Location>,
) {
    let mut victim: Option<(Vec<u8>, Instant)> = None;
    warm.for_each(|key, entry| match &victim {
        Some((_, stamp)) if entry.last_access >= *stamp => {}
        _ => victim = Some((key.to_vec(), entry.last_access)),
    });
    let Some((key, _)) = victim else { return };
    let entry = warm.remove(&key).expect("victim resides in warm");
    cold.insert(key, entry.location);
}
