//! Two-tier audio cache
//!
//! Exact tier: normalized text + voice id → entry. Phonetic tier: union of
//! group postings, best candidate by Jaccard similarity above the configured
//! threshold. Entries are validated on read; anything structurally invalid
//! is treated as a miss and evicted rather than surfaced as an error.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use outdial_config::CacheConfig;

use crate::phonetic::{is_phonetically_cacheable, jaccard_similarity, normalize, phonetic_groups};

/// A cached synthesis artifact: the provider's compressed audio plus the
/// transcoded narrowband playback bytes. Both are required; an entry missing
/// either is corrupt.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized source text
    pub text: String,
    /// Voice the audio was synthesized with
    pub voice_id: String,
    /// Compressed synthesis output
    pub synth_audio: Vec<u8>,
    /// Narrowband µ-law playback bytes
    pub playback_audio: Vec<u8>,
    /// Phonetic group tags
    pub groups: Vec<String>,
    /// Creation time for TTL expiry
    pub created_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        !self.synth_audio.is_empty() && !self.playback_audio.is_empty()
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// Exact normalized-key match
    Exact,
    /// Phonetic-tier match at the given similarity
    Phonetic { matched_text: String },
}

/// Process-wide audio cache shared by all calls
pub struct AudioCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    /// group tag → entry keys carrying that tag
    groups: DashMap<String, Vec<String>>,
}

impl AudioCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    fn key(text: &str, voice_id: &str) -> String {
        format!("{}::{}", voice_id, normalize(text))
    }

    /// Look up audio for a phrase. Exact tier first; phonetic tier only for
    /// qualifying text.
    pub fn get(&self, text: &str, voice_id: &str) -> Option<(CacheEntry, CacheHit)> {
        if !self.config.enabled {
            return None;
        }

        let key = Self::key(text, voice_id);

        if let Some(entry) = self.read_validated(&key) {
            metrics::counter!("outdial_cache_hits", "tier" => "exact").increment(1);
            return Some((entry, CacheHit::Exact));
        }

        if !is_phonetically_cacheable(text, self.config.min_cacheable_chars) {
            metrics::counter!("outdial_cache_misses").increment(1);
            return None;
        }

        let result = self.phonetic_lookup(text, voice_id);
        if result.is_some() {
            metrics::counter!("outdial_cache_hits", "tier" => "phonetic").increment(1);
        } else {
            metrics::counter!("outdial_cache_misses").increment(1);
        }
        result
    }

    /// Store synthesized audio for a phrase. Entries are never mutated in
    /// place; a put for an existing key replaces the entry wholesale.
    pub fn put(
        &self,
        text: &str,
        voice_id: &str,
        synth_audio: Vec<u8>,
        playback_audio: Vec<u8>,
    ) {
        if !self.config.enabled {
            return;
        }

        let normalized = normalize(text);
        let key = Self::key(text, voice_id);
        let groups = if is_phonetically_cacheable(text, self.config.min_cacheable_chars) {
            phonetic_groups(text)
        } else {
            Vec::new()
        };

        for group in &groups {
            let mut posting = self.groups.entry(group.clone()).or_default();
            if !posting.contains(&key) {
                posting.push(key.clone());
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                text: normalized,
                voice_id: voice_id.to_string(),
                synth_audio,
                playback_audio,
                groups,
                created_at: Instant::now(),
            },
        );
    }

    /// Entries currently stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Startup maintenance: purge corrupted and expired entries.
    pub fn maintenance(&self) -> usize {
        let ttl = Duration::from_secs(self.config.entry_ttl_secs);
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_valid() || e.value().is_expired(ttl))
            .map(|e| e.key().clone())
            .collect();

        for key in &stale {
            self.evict(key);
        }
        if !stale.is_empty() {
            tracing::info!(purged = stale.len(), "Cache maintenance purged entries");
        }
        stale.len()
    }

    /// Read an entry, evicting it when corrupt or expired
    fn read_validated(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        let ttl = Duration::from_secs(self.config.entry_ttl_secs);
        if !entry.is_valid() || entry.is_expired(ttl) {
            drop(entry);
            self.evict(key);
            tracing::debug!(key = %key, "Evicted invalid cache entry on read");
            return None;
        }
        Some(entry)
    }

    fn phonetic_lookup(&self, text: &str, voice_id: &str) -> Option<(CacheEntry, CacheHit)> {
        let normalized = normalize(text);
        let groups = phonetic_groups(text);

        let mut candidates: Vec<String> = Vec::new();
        for group in &groups {
            if let Some(posting) = self.groups.get(group) {
                for key in posting.iter() {
                    if !candidates.contains(key) {
                        candidates.push(key.clone());
                    }
                }
            }
        }

        let mut best: Option<(f64, CacheEntry)> = None;
        for key in candidates {
            let Some(entry) = self.read_validated(&key) else {
                continue;
            };
            if entry.voice_id != voice_id {
                continue;
            }
            let similarity = jaccard_similarity(&normalized, &entry.text);
            if similarity >= self.config.jaccard_threshold
                && best.as_ref().map(|(s, _)| similarity > *s).unwrap_or(true)
            {
                best = Some((similarity, entry));
            }
        }

        best.map(|(_, entry)| {
            let matched = entry.text.clone();
            (
                entry,
                CacheHit::Phonetic {
                    matched_text: matched,
                },
            )
        })
    }

    fn evict(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            for group in &entry.groups {
                if let Some(mut posting) = self.groups.get_mut(group) {
                    posting.retain(|k| k != key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> AudioCache {
        AudioCache::new(CacheConfig::default())
    }

    fn audio() -> (Vec<u8>, Vec<u8>) {
        (vec![1, 2, 3], vec![4, 5, 6])
    }

    #[test]
    fn test_put_then_get_exact() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("Hello, how are you today?", "voice-a", synth.clone(), playback.clone());

        let (entry, hit) = cache.get("hello how are you today", "voice-a").unwrap();
        assert_eq!(hit, CacheHit::Exact);
        assert_eq!(entry.synth_audio, synth);
        assert_eq!(entry.playback_audio, playback);
    }

    #[test]
    fn test_unseen_text_is_a_miss() {
        let cache = cache();
        assert!(cache.get("never stored this phrase", "voice-a").is_none());
    }

    #[test]
    fn test_voice_id_separates_entries() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("good morning to you there", "voice-a", synth, playback);
        assert!(cache.get("good morning to you there", "voice-b").is_none());
    }

    #[test]
    fn test_phonetic_near_match() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("good morning how are you doing today", "voice-a", synth, playback);

        // Same word set minus one word — above the 0.8 Jaccard threshold
        let result = cache.get("good morning how are you doing", "voice-a");
        let (_, hit) = result.expect("expected phonetic hit");
        assert!(matches!(hit, CacheHit::Phonetic { .. }));
    }

    #[test]
    fn test_phonetic_rejects_below_threshold() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("good morning how are you doing today", "voice-a", synth, playback);
        assert!(cache.get("good evening where are they going", "voice-a").is_none());
    }

    #[test]
    fn test_digits_never_phonetically_matched() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("your appointment is at three thirty", "voice-a", synth, playback);
        // Digit-bearing query must not take the phonetic path
        assert!(cache.get("your appointment is at 3 thirty", "voice-a").is_none());
    }

    #[test]
    fn test_corrupt_entry_is_miss_and_removed() {
        let cache = cache();
        // Missing playback audio → structurally invalid
        cache.put("this entry is missing audio data", "voice-a", vec![1], Vec::new());
        assert_eq!(cache.len(), 1);

        assert!(cache.get("this entry is missing audio data", "voice-a").is_none());
        assert_eq!(cache.len(), 0, "corrupt entry must be evicted on read");
    }

    #[test]
    fn test_maintenance_purges_corrupted() {
        let cache = cache();
        let (synth, playback) = audio();
        cache.put("a perfectly valid cached phrase", "voice-a", synth, playback);
        cache.put("a corrupted cached phrase here", "voice-a", Vec::new(), Vec::new());

        let purged = cache.maintenance();
        assert_eq!(purged, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = AudioCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let (synth, playback) = audio();
        cache.put("hello how are you today", "voice-a", synth, playback);
        assert!(cache.get("hello how are you today", "voice-a").is_none());
    }
}
