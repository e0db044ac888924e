//! In-memory cache of decoded vector indexes.
//!
//! Entries are keyed by field id. Each lookup bumps a hit counter; a
//! background monitor samples the counters every sweep interval into an
//! exponentially weighted moving average and evicts entries whose average
//! has fallen to `1 - alpha` or below while no handle references them.
//! The monitor exits once the cache is empty and is restarted by the next
//! insert.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use ahash::AHashMap;
use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::{Mutex, RwLock};

use crate::config::VectorCacheConfig;
use crate::error::Result;
use crate::vector::section::VectorFieldData;

#[derive(Debug)]
struct CacheEntry {
    data: VectorFieldData,
    hits: AtomicU64,
    refs: AtomicI64,
    /// EWMA of hit samples, stored as `f64` bits.
    avg: AtomicU64,
}

impl CacheEntry {
    fn new(data: VectorFieldData) -> Self {
        CacheEntry {
            data,
            hits: AtomicU64::new(1),
            refs: AtomicI64::new(0),
            avg: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Fold the hits since the last sample into the average.
    fn sample(&self, alpha: f64) -> f64 {
        let hits = self.hits.swap(0, Ordering::AcqRel) as f64;
        let prev = f64::from_bits(self.avg.load(Ordering::Acquire));
        let avg = alpha * hits + (1.0 - alpha) * prev;
        self.avg.store(avg.to_bits(), Ordering::Release);
        avg
    }
}

/// Live reference to a cached field index.
#[derive(Debug)]
pub struct CacheHandle {
    entry: Arc<CacheEntry>,
}

impl Deref for CacheHandle {
    type Target = VectorFieldData;

    fn deref(&self) -> &VectorFieldData {
        &self.entry.data
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.entry.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct CacheInner {
    config: VectorCacheConfig,
    entries: RwLock<AHashMap<u16, Arc<CacheEntry>>>,
    monitoring: AtomicBool,
}

impl CacheInner {
    fn sweep(&self) -> usize {
        let alpha = self.config.ewma_alpha;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|field_id, entry| {
            let avg = entry.sample(alpha);
            let refs = entry.refs.load(Ordering::Acquire);
            let keep = avg > 1.0 - alpha || refs > 0;
            if !keep {
                log::debug!("evicting vector index of field {field_id} (avg {avg:.3})");
            }
            keep
        });
        if entries.is_empty() {
            self.monitoring.store(false, Ordering::Release);
        }
        before - entries.len()
    }
}

#[derive(Debug)]
struct Monitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-segment vector index cache.
#[derive(Debug)]
pub struct VectorIndexCache {
    inner: Arc<CacheInner>,
    monitor: Mutex<Option<Monitor>>,
}

impl VectorIndexCache {
    pub fn new(config: VectorCacheConfig) -> Self {
        VectorIndexCache {
            inner: Arc::new(CacheInner {
                config,
                entries: RwLock::new(AHashMap::new()),
                monitoring: AtomicBool::new(false),
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Get the field's entry, decoding it with `load` on a miss.
    pub fn get_or_load<F>(&self, field_id: u16, load: F) -> Result<CacheHandle>
    where
        F: FnOnce() -> Result<VectorFieldData>,
    {
        if let Some(entry) = self.inner.entries.read().get(&field_id) {
            return Ok(Self::handle(entry));
        }

        let mut entries = self.inner.entries.write();
        if let Some(entry) = entries.get(&field_id) {
            return Ok(Self::handle(entry));
        }

        let entry = Arc::new(CacheEntry::new(load()?));
        entry.refs.fetch_add(1, Ordering::AcqRel);
        entries.insert(field_id, Arc::clone(&entry));

        if !self.inner.monitoring.swap(true, Ordering::AcqRel) {
            self.start_monitor()?;
        }
        Ok(CacheHandle { entry })
    }

    fn handle(entry: &Arc<CacheEntry>) -> CacheHandle {
        entry.hits.fetch_add(1, Ordering::AcqRel);
        entry.refs.fetch_add(1, Ordering::AcqRel);
        CacheHandle {
            entry: Arc::clone(entry),
        }
    }

    fn start_monitor(&self) -> Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(self.inner.config.sweep_interval());
        let inner = Arc::clone(&self.inner);

        let handle = thread::Builder::new()
            .name("strata-vector-cache".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            inner.sweep();
                            if !inner.monitoring.load(Ordering::Acquire) {
                                break;
                            }
                        }
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.monitoring.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        // A previous monitor has already exited or is about to.
        if let Some(old) = self.monitor.lock().replace(Monitor {
            stop: stop_tx,
            handle,
        }) {
            let _ = old.stop.try_send(());
        }
        Ok(())
    }

    /// Run one eviction pass now; returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, field_id: u16) -> bool {
        self.inner.entries.read().contains_key(&field_id)
    }

    /// Whether the background monitor is running.
    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::Acquire)
    }

    /// Stop the monitor and drop every entry.
    pub fn shutdown(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            let _ = monitor.stop.try_send(());
            let _ = monitor.handle.join();
        }
        self.inner.entries.write().clear();
        self.inner.monitoring.store(false, Ordering::Release);
    }
}

impl Drop for VectorIndexCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::VectorIndexConfig;
    use crate::vector::distance::{IndexOptimization, VectorMetric};
    use crate::vector::index::VectorIndex;

    fn field_data() -> VectorFieldData {
        let index = VectorIndex::build(
            1,
            VectorMetric::L2,
            IndexOptimization::Recall,
            vec![0, 1],
            vec![0.0, 1.0],
            &VectorIndexConfig::default(),
        )
        .unwrap();
        VectorFieldData::new(index, IndexOptimization::Recall, vec![(0, 0), (1, 1)])
    }

    fn slow_config() -> VectorCacheConfig {
        VectorCacheConfig {
            sweep_interval_ms: 60_000,
            ..VectorCacheConfig::default()
        }
    }

    #[test]
    fn test_hit_reuses_entry() {
        let cache = VectorIndexCache::new(slow_config());
        let mut loads = 0;
        for _ in 0..3 {
            let handle = cache
                .get_or_load(4, || {
                    loads += 1;
                    Ok(field_data())
                })
                .unwrap();
            assert_eq!(handle.num_vectors(), 2);
        }
        assert_eq!(loads, 1);
        assert!(cache.contains(4));
        assert!(cache.is_monitoring());
    }

    #[test]
    fn test_referenced_entries_survive_sweeps() {
        let cache = VectorIndexCache::new(slow_config());
        let handle = cache.get_or_load(0, || Ok(field_data())).unwrap();

        for _ in 0..5 {
            assert_eq!(cache.sweep(), 0);
        }
        drop(handle);

        // Unreferenced with a decayed average.
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
        assert!(!cache.is_monitoring());
    }

    #[test]
    fn test_busy_entries_survive_sweeps() {
        let cache = VectorIndexCache::new(slow_config());
        drop(cache.get_or_load(0, || Ok(field_data())).unwrap());
        for _ in 0..5 {
            drop(cache.get_or_load(0, || Ok(field_data())).unwrap());
            assert_eq!(cache.sweep(), 0);
        }
    }

    #[test]
    fn test_monitor_stops_when_empty() {
        let cache = VectorIndexCache::new(VectorCacheConfig {
            sweep_interval_ms: 5,
            ..VectorCacheConfig::default()
        });
        drop(cache.get_or_load(1, || Ok(field_data())).unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.is_monitoring() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(cache.is_empty());
        assert!(!cache.is_monitoring());

        // The next insert restarts it.
        let _handle = cache.get_or_load(1, || Ok(field_data())).unwrap();
        assert!(cache.is_monitoring());
        cache.shutdown();
        assert!(cache.is_empty());
    }
}
