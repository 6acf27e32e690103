//! Two-tier audio cache for synthesized phrases
//!
//! Maps previously synthesized text (plus voice identity) to ready-to-play
//! audio so repeat phrases skip synthesis and transcoding entirely. Lookup
//! tries an exact normalized key first, then a phonetic-similarity pass for
//! qualifying phrases. Cache failures are never surfaced as errors: corrupt
//! entries read as misses and are evicted.

pub mod phonetic;
pub mod store;

pub use phonetic::{is_phonetically_cacheable, jaccard_similarity, normalize, phonetic_groups};
pub use store::{AudioCache, CacheEntry, CacheHit};
