use lru::LruCache;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::OnceCell;

const MAX_SHARDS: usize = 8;
const MIN_ENTRIES_PER_SHARD: usize = 16;

type Slot<V> = Arc<OnceCell<V>>;
type Shard<K, V> = parking_lot::Mutex<LruCache<K, Slot<V>>>;

/// Bounded LRU map whose misses are loaded at most once per key at a time.
///
/// Concurrent callers missing on the same key share one load; a failed load
/// leaves the slot empty so the next caller retries. Eviction is per shard,
/// so the bound is approximate for large capacities.
pub(crate) struct SingleFlightLru<K, V> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V> SingleFlightLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let shard_count = (capacity / MIN_ENTRIES_PER_SHARD).clamp(1, MAX_SHARDS);
        let per_shard =
            NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shard_count)
                .map(|_| parking_lot::Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key)
            .lock()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut shard = self.shard(&key).lock();
            match shard.get(&key) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot: Slot<V> = Arc::new(OnceCell::new());
                    shard.put(key, Arc::clone(&slot));
                    slot
                }
            }
        };
        slot.get_or_try_init(load).await.cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        let slot = Arc::new(OnceCell::new_with(Some(value)));
        self.shard(&key).lock().put(key, slot);
    }

    pub fn remove(&self, key: &K) {
        self.shard(key).lock().pop(key);
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    /// Loaded entries only; in-flight slots are skipped.
    pub fn loaded(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            out.extend(
                shard
                    .iter()
                    .filter_map(|(k, slot)| slot.get().map(|v| (k.clone(), v.clone()))),
            );
        }
        out
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().iter().filter(|(_, slot)| slot.initialized()).count())
            .sum()
    }
}
