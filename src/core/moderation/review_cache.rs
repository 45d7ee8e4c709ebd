// Short-lived, process-local state that only drives review button availability.
//
// Everything here is lost on restart. That only hides Untimeout/Resend buttons
// on old logs; the timeout itself and the deletion live on the platform.

use super::moderation_models::DeletedMessageSnapshot;
use moka::sync::Cache;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReviewCacheConfig {
    /// Maximum entries per map.
    pub max_capacity: u64,
    /// Entries expire this long after insertion.
    pub ttl: Duration,
}

impl Default for ReviewCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }
}

fn build_cache<V: Clone + Send + Sync + 'static>(config: &ReviewCacheConfig) -> Cache<u64, V> {
    Cache::builder()
        .max_capacity(config.max_capacity)
        .time_to_live(config.ttl)
        .build()
}

/// Message id keyed caches backing the review panel.
pub struct ReviewCache {
    /// Message id -> a timeout was issued for the enforcement on this message.
    timeouts_issued: Cache<u64, bool>,
    /// Message id -> a staff member has claimed the Warn action.
    warned: Cache<u64, bool>,
    /// Message id -> content captured before deletion, until restored.
    snapshots: Cache<u64, DeletedMessageSnapshot>,
    /// Message id -> image urls that crossed the threshold on the last run.
    flagged_images: Cache<u64, Vec<String>>,
}

impl ReviewCache {
    pub fn new(config: ReviewCacheConfig) -> Self {
        Self {
            timeouts_issued: build_cache(&config),
            warned: build_cache(&config),
            snapshots: build_cache(&config),
            flagged_images: build_cache(&config),
        }
    }

    /// Atomically claim the Warn action for a message. Only the first caller
    /// gets `true` until the claim is released.
    pub fn claim_warning(&self, message_id: u64) -> bool {
        self.warned.entry(message_id).or_insert(true).is_fresh()
    }

    pub fn release_warning(&self, message_id: u64) {
        self.warned.invalidate(&message_id);
    }

    pub fn mark_timeout_issued(&self, message_id: u64) {
        self.timeouts_issued.insert(message_id, true);
    }

    pub fn timeout_issued(&self, message_id: u64) -> bool {
        self.timeouts_issued.get(&message_id).unwrap_or(false)
    }

    pub fn clear_timeout(&self, message_id: u64) {
        self.timeouts_issued.invalidate(&message_id);
    }

    pub fn store_snapshot(&self, snapshot: DeletedMessageSnapshot) {
        self.snapshots.insert(snapshot.message_id, snapshot);
    }

    pub fn snapshot(&self, message_id: u64) -> Option<DeletedMessageSnapshot> {
        self.snapshots.get(&message_id)
    }

    #[cfg(test)]
    pub fn has_snapshot(&self, message_id: u64) -> bool {
        self.snapshots.contains_key(&message_id)
    }

    /// Remove and return the snapshot; a second call returns `None`.
    pub fn take_snapshot(&self, message_id: u64) -> Option<DeletedMessageSnapshot> {
        self.snapshots.remove(&message_id)
    }

    pub fn discard_snapshot(&self, message_id: u64) {
        self.snapshots.invalidate(&message_id);
    }

    /// Replace the flagged-image association for a message. An empty list
    /// clears it so a clean re-run leaves nothing stale behind.
    pub fn set_flagged_images(&self, message_id: u64, urls: Vec<String>) {
        if urls.is_empty() {
            self.flagged_images.invalidate(&message_id);
        } else {
            self.flagged_images.insert(message_id, urls);
        }
    }

    pub fn flagged_images(&self, message_id: u64) -> Vec<String> {
        self.flagged_images.get(&message_id).unwrap_or_default()
    }
}

impl Default for ReviewCache {
    fn default() -> Self {
        Self::new(ReviewCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::test_support::message;

    #[test]
    fn snapshot_can_only_be_taken_once() {
        let cache = ReviewCache::default();
        cache.store_snapshot(DeletedMessageSnapshot::capture(&message(1, 10, 3, "hi")));

        assert!(cache.has_snapshot(10));
        assert_eq!(cache.take_snapshot(10).map(|s| s.content), Some("hi".to_string()));
        assert!(cache.take_snapshot(10).is_none());
        assert!(!cache.has_snapshot(10));
    }

    #[test]
    fn timeout_flag_defaults_to_false_and_clears() {
        let cache = ReviewCache::default();
        assert!(!cache.timeout_issued(5));
        cache.mark_timeout_issued(5);
        assert!(cache.timeout_issued(5));
        cache.clear_timeout(5);
        assert!(!cache.timeout_issued(5));
    }

    #[test]
    fn warning_claim_is_granted_once_until_released() {
        let cache = ReviewCache::default();
        assert!(cache.claim_warning(3));
        assert!(!cache.claim_warning(3));
        assert!(cache.claim_warning(4));
        cache.release_warning(3);
        assert!(cache.claim_warning(3));
    }

    #[test]
    fn caches_of_different_value_types_share_one_config() {
        let cache = ReviewCache::new(ReviewCacheConfig {
            max_capacity: 10,
            ttl: Duration::from_secs(60),
        });
        cache.mark_timeout_issued(1);
        cache.set_flagged_images(1, vec!["https://a/1.png".into()]);
        cache.store_snapshot(DeletedMessageSnapshot::capture(&message(1, 1, 3, "hi")));
        assert!(cache.timeout_issued(1));
        assert_eq!(cache.flagged_images(1).len(), 1);
        assert!(cache.has_snapshot(1));
    }

    #[test]
    fn empty_flagged_image_list_clears_association() {
        let cache = ReviewCache::default();
        cache.set_flagged_images(7, vec!["https://a/1.png".into()]);
        assert_eq!(cache.flagged_images(7), vec!["https://a/1.png".to_string()]);
        cache.set_flagged_images(7, Vec::new());
        assert!(cache.flagged_images(7).is_empty());
    }
}
