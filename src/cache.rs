//! Three-tier LRU caching for gesture matching: full match results, raw DTW
//! distances, and preprocessed features, each with a TTL checked on read.
//!
//! Keys hash only six landmarks (wrist plus fingertips) rounded to a fixed
//! precision, so near-identical inputs collide on purpose. The digests are
//! process-local; nothing here is a serialization contract and entries must
//! never be persisted across restarts.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use ndarray::Array2;

use crate::types::{AppContext, Frame, GestureTemplate};

pub const MATCH_CACHE_SIZE: usize = 50;
pub const DTW_CACHE_SIZE: usize = 200;
pub const FEATURE_CACHE_SIZE: usize = 500;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Landmarks sampled into the cache key: wrist and the five fingertips.
const KEY_LANDMARKS: [usize; 6] = [0, 4, 8, 12, 16, 20];
const MATCH_KEY_PRECISION: i32 = 2;
const FEATURE_KEY_PRECISION: i32 = 3;

struct TimedEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T> TimedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TableStats {
    pub hits: u64,
    pub misses: u64,
}

impl TableStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TableStats {
        TableStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// The cache tables are locked independently so scoring workers touching
/// different tiers never contend on one mutex.
pub struct MatchCache {
    match_table: Mutex<LruCache<String, TimedEntry<(GestureTemplate, f64)>>>,
    dtw_table: Mutex<LruCache<String, TimedEntry<f64>>>,
    feature_table: Mutex<LruCache<String, TimedEntry<Array2<f64>>>>,
    ttl: Duration,
    match_stats: Counters,
    dtw_stats: Counters,
    feature_stats: Counters,
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new(
            MATCH_CACHE_SIZE,
            DTW_CACHE_SIZE,
            FEATURE_CACHE_SIZE,
            DEFAULT_TTL,
        )
    }
}

impl MatchCache {
    pub fn new(
        match_size: usize,
        dtw_size: usize,
        feature_size: usize,
        ttl: Duration,
    ) -> Self {
        let cap = |n: usize| NonZeroUsize::new(n.max(1)).expect("capacity is at least one");
        Self {
            match_table: Mutex::new(LruCache::new(cap(match_size))),
            dtw_table: Mutex::new(LruCache::new(cap(dtw_size))),
            feature_table: Mutex::new(LruCache::new(cap(feature_size))),
            ttl,
            match_stats: Counters::default(),
            dtw_stats: Counters::default(),
            feature_stats: Counters::default(),
        }
    }

    pub fn get_match(
        &self,
        input_frames: &[Frame],
        user_id: i64,
        app_context: AppContext,
    ) -> Option<(GestureTemplate, f64)> {
        let key = match_key(input_frames, user_id, app_context);
        let mut table = self.match_table.lock().expect("match cache poisoned");
        match table.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.match_stats.hit();
                log::debug!("match cache hit: {}", &key[..16.min(key.len())]);
                Some(entry.value.clone())
            }
            Some(_) => {
                table.pop(&key);
                self.match_stats.miss();
                None
            }
            None => {
                self.match_stats.miss();
                None
            }
        }
    }

    pub fn put_match(
        &self,
        input_frames: &[Frame],
        user_id: i64,
        app_context: AppContext,
        result: (GestureTemplate, f64),
    ) {
        let key = match_key(input_frames, user_id, app_context);
        self.match_table
            .lock()
            .expect("match cache poisoned")
            .put(key, TimedEntry::new(result));
    }

    pub fn get_dtw_distance(&self, frames_a: &[Frame], frames_b: &[Frame]) -> Option<f64> {
        let key = pair_key(frames_a, frames_b);
        let mut table = self.dtw_table.lock().expect("dtw cache poisoned");
        match table.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.dtw_stats.hit();
                Some(entry.value)
            }
            Some(_) => {
                table.pop(&key);
                self.dtw_stats.miss();
                None
            }
            None => {
                self.dtw_stats.miss();
                None
            }
        }
    }

    pub fn put_dtw_distance(&self, frames_a: &[Frame], frames_b: &[Frame], distance: f64) {
        let key = pair_key(frames_a, frames_b);
        self.dtw_table
            .lock()
            .expect("dtw cache poisoned")
            .put(key, TimedEntry::new(distance));
    }

    pub fn get_features(&self, frames: &[Frame]) -> Option<Array2<f64>> {
        let key = feature_key(frames);
        let mut table = self.feature_table.lock().expect("feature cache poisoned");
        match table.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.feature_stats.hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                table.pop(&key);
                self.feature_stats.miss();
                None
            }
            None => {
                self.feature_stats.miss();
                None
            }
        }
    }

    pub fn put_features(&self, frames: &[Frame], features: Array2<f64>) {
        let key = feature_key(frames);
        self.feature_table
            .lock()
            .expect("feature cache poisoned")
            .put(key, TimedEntry::new(features));
    }

    /// Drop every match-cache entry belonging to `user_id`. Called on any
    /// template create/update/delete for that user.
    pub fn invalidate_user(&self, user_id: i64) {
        let prefix = format!("match:{user_id}:");
        let mut table = self.match_table.lock().expect("match cache poisoned");
        let stale: Vec<String> = table
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            table.pop(key);
        }
        log::info!("invalidated {} cache entries for user {user_id}", stale.len());
    }

    pub fn clear_all(&self) {
        self.match_table.lock().expect("match cache poisoned").clear();
        self.dtw_table.lock().expect("dtw cache poisoned").clear();
        self.feature_table
            .lock()
            .expect("feature cache poisoned")
            .clear();
        log::info!("all caches cleared");
    }

    pub fn stats(&self) -> (TableStats, TableStats, TableStats) {
        (
            self.match_stats.snapshot(),
            self.dtw_stats.snapshot(),
            self.feature_stats.snapshot(),
        )
    }
}

/// Digest of the key landmarks rounded to `precision` decimals.
pub fn hash_frames(frames: &[Frame], precision: i32) -> String {
    if frames.is_empty() {
        return format!("{:x}", md5::compute(b"empty"));
    }

    let factor = 10f64.powi(precision);
    let mut features: Vec<f64> = Vec::with_capacity(frames.len() * KEY_LANDMARKS.len() * 3);
    for frame in frames {
        for &idx in &KEY_LANDMARKS {
            if let Some(lm) = frame.landmarks.get(idx) {
                features.push((lm.x * factor).round() / factor);
                features.push((lm.y * factor).round() / factor);
                features.push((lm.z * factor).round() / factor);
            }
        }
    }

    let serialized =
        serde_json::to_string(&features).expect("a vector of floats serializes");
    format!("{:x}", md5::compute(serialized.as_bytes()))
}

/// Order-independent digest for a sequence pair: the per-sequence digests are
/// sorted before combining, so `pair_key(a, b) == pair_key(b, a)`.
pub fn pair_key(frames_a: &[Frame], frames_b: &[Frame]) -> String {
    let hash_a = hash_frames(frames_a, MATCH_KEY_PRECISION);
    let hash_b = hash_frames(frames_b, MATCH_KEY_PRECISION);
    let (low, high) = if hash_a <= hash_b {
        (hash_a, hash_b)
    } else {
        (hash_b, hash_a)
    };
    format!("{:x}", md5::compute(format!("{low}:{high}").as_bytes()))
}

fn match_key(frames: &[Frame], user_id: i64, app_context: AppContext) -> String {
    format!(
        "match:{user_id}:{}:{}",
        app_context.as_str(),
        hash_frames(frames, MATCH_KEY_PRECISION)
    )
}

fn feature_key(frames: &[Frame]) -> String {
    format!("features:{}", hash_frames(frames, FEATURE_KEY_PRECISION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{swipe_frames, template_from_frames};

    fn cache_with_ttl(ttl: Duration) -> MatchCache {
        MatchCache::new(2, 2, 2, ttl)
    }

    #[test]
    fn pair_key_is_symmetric() {
        let a = swipe_frames(20, [0.3, 0.5], [0.7, 0.5]);
        let b = swipe_frames(25, [0.7, 0.5], [0.3, 0.5]);
        assert_eq!(pair_key(&a, &b), pair_key(&b, &a));
        assert_ne!(pair_key(&a, &b), pair_key(&a, &a));
    }

    #[test]
    fn rounding_makes_near_identical_inputs_collide() {
        let a = swipe_frames(20, [0.3, 0.5], [0.7, 0.5]);
        let mut b = a.clone();
        for frame in &mut b {
            for lm in &mut frame.landmarks {
                lm.x += 1e-5;
            }
        }
        assert_eq!(
            hash_frames(&a, MATCH_KEY_PRECISION),
            hash_frames(&b, MATCH_KEY_PRECISION)
        );
    }

    #[test]
    fn dtw_round_trip_and_lru_eviction() {
        let cache = cache_with_ttl(DEFAULT_TTL);
        let a = swipe_frames(20, [0.1, 0.5], [0.3, 0.5]);
        let b = swipe_frames(20, [0.2, 0.5], [0.4, 0.5]);
        let c = swipe_frames(20, [0.3, 0.5], [0.5, 0.5]);
        let d = swipe_frames(20, [0.4, 0.5], [0.6, 0.5]);

        cache.put_dtw_distance(&a, &b, 12.5);
        cache.put_dtw_distance(&a, &c, 20.0);
        assert_eq!(cache.get_dtw_distance(&b, &a), Some(12.5));

        // Capacity 2: inserting a third pair evicts the least recent (a, c).
        cache.put_dtw_distance(&a, &d, 30.0);
        assert_eq!(cache.get_dtw_distance(&a, &c), None);
        assert_eq!(cache.get_dtw_distance(&a, &b), Some(12.5));
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = cache_with_ttl(Duration::from_millis(0));
        let a = swipe_frames(20, [0.1, 0.5], [0.3, 0.5]);
        let b = swipe_frames(20, [0.2, 0.5], [0.4, 0.5]);
        cache.put_dtw_distance(&a, &b, 5.0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get_dtw_distance(&a, &b), None);
    }

    #[test]
    fn invalidate_user_only_touches_that_user() {
        let cache = cache_with_ttl(DEFAULT_TTL);
        let frames = swipe_frames(20, [0.3, 0.5], [0.7, 0.5]);
        let template = template_from_frames(1, frames.clone());

        cache.put_match(&frames, 1, AppContext::Global, (template.clone(), 0.9));
        cache.put_match(&frames, 2, AppContext::Global, (template, 0.8));

        cache.invalidate_user(1);
        assert!(cache.get_match(&frames, 1, AppContext::Global).is_none());
        assert!(cache.get_match(&frames, 2, AppContext::Global).is_some());
    }

    #[test]
    fn clear_all_wipes_every_table() {
        let cache = cache_with_ttl(DEFAULT_TTL);
        let frames = swipe_frames(20, [0.3, 0.5], [0.7, 0.5]);
        cache.put_dtw_distance(&frames, &frames, 1.0);
        cache.put_features(&frames, Array2::zeros((2, 2)));
        cache.clear_all();
        assert!(cache.get_dtw_distance(&frames, &frames).is_none());
        assert!(cache.get_features(&frames).is_none());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = cache_with_ttl(DEFAULT_TTL);
        let frames = swipe_frames(20, [0.3, 0.5], [0.7, 0.5]);
        cache.get_features(&frames);
        cache.put_features(&frames, Array2::zeros((2, 2)));
        cache.get_features(&frames);
        let (_, _, feature_stats) = cache.stats();
        assert_eq!(feature_stats.hits, 1);
        assert_eq!(feature_stats.misses, 1);
        assert!((feature_stats.hit_rate() - 0.5).abs() < 1e-12);
    }
}
