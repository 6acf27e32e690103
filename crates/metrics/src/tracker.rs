//! Stage latency tracker with rolling windows and a degradation breaker

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use outdial_config::LatencyConfig;

/// Summary statistics for one stage's rolling window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

#[derive(Default)]
struct StageWindow {
    durations_ms: VecDeque<u64>,
    errors: u64,
}

struct OpenSpan {
    started: Instant,
}

#[derive(Default)]
struct Counters {
    cache_hits: u64,
    cache_misses: u64,
}

/// Process-wide latency monitor.
///
/// Records named stage boundaries keyed by call id + stage, keeps a rolling
/// window per stage, and flags a degradation event after a run of
/// consecutive calls exceed the end-to-end ceiling. The breaker only flags;
/// it never stops the pipeline.
pub struct CycleTracker {
    config: LatencyConfig,
    windows: Mutex<HashMap<String, StageWindow>>,
    open: Mutex<HashMap<(String, String), OpenSpan>>,
    counters: Mutex<Counters>,
    consecutive_slow: Mutex<u32>,
    degraded: Mutex<bool>,
}

impl CycleTracker {
    pub fn new(config: LatencyConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            open: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            consecutive_slow: Mutex::new(0),
            degraded: Mutex::new(false),
        }
    }

    /// Mark the start of a stage for a call
    pub fn stage_start(&self, call_id: &str, stage: &str) {
        self.open.lock().insert(
            (call_id.to_string(), stage.to_string()),
            OpenSpan {
                started: Instant::now(),
            },
        );
    }

    /// Mark the completion of a stage; returns the duration if matched
    pub fn stage_complete(&self, call_id: &str, stage: &str) -> Option<u64> {
        let span = self
            .open
            .lock()
            .remove(&(call_id.to_string(), stage.to_string()))?;
        let duration_ms = span.started.elapsed().as_millis() as u64;
        self.record(stage, duration_ms);
        Some(duration_ms)
    }

    /// Record an already-measured stage duration
    pub fn record(&self, stage: &str, duration_ms: u64) {
        let mut windows = self.windows.lock();
        let window = windows.entry(stage.to_string()).or_default();
        window.durations_ms.push_back(duration_ms);
        while window.durations_ms.len() > self.config.window_size {
            window.durations_ms.pop_front();
        }
        metrics::histogram!("outdial_stage_ms", "stage" => stage.to_string())
            .record(duration_ms as f64);
    }

    /// Record a stage error
    pub fn record_error(&self, stage: &str) {
        let mut windows = self.windows.lock();
        windows.entry(stage.to_string()).or_default().errors += 1;
        metrics::counter!("outdial_stage_errors", "stage" => stage.to_string()).increment(1);
    }

    pub fn record_cache_hit(&self) {
        self.counters.lock().cache_hits += 1;
        metrics::counter!("outdial_cache_hits").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.counters.lock().cache_misses += 1;
        metrics::counter!("outdial_cache_misses").increment(1);
    }

    /// (hits, misses)
    pub fn cache_counts(&self) -> (u64, u64) {
        let counters = self.counters.lock();
        (counters.cache_hits, counters.cache_misses)
    }

    pub fn error_count(&self, stage: &str) -> u64 {
        self.windows
            .lock()
            .get(stage)
            .map(|w| w.errors)
            .unwrap_or(0)
    }

    /// Compute stats over the rolling window for one stage
    pub fn stats(&self, stage: &str) -> Option<StageStats> {
        let windows = self.windows.lock();
        let window = windows.get(stage)?;
        if window.durations_ms.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = window.durations_ms.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let p95_idx = ((count as f64 * 0.95).ceil() as usize).saturating_sub(1);

        Some(StageStats {
            count,
            avg_ms: sum as f64 / count as f64,
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            p95_ms: sorted[p95_idx],
        })
    }

    /// Feed one call's end-to-end latency into the circuit breaker.
    ///
    /// Returns true if this observation tripped the breaker.
    pub fn observe_call_latency(&self, call_id: &str, e2e_ms: u64) -> bool {
        self.record("call_e2e", e2e_ms);

        let mut slow = self.consecutive_slow.lock();
        if e2e_ms > self.config.slow_call_ceiling_ms {
            *slow += 1;
            if *slow >= self.config.breaker_threshold {
                let mut degraded = self.degraded.lock();
                if !*degraded {
                    *degraded = true;
                    tracing::warn!(
                        call_id = %call_id,
                        consecutive_slow = *slow,
                        ceiling_ms = self.config.slow_call_ceiling_ms,
                        "Latency degradation detected"
                    );
                    metrics::counter!("outdial_latency_degradation").increment(1);
                    return true;
                }
            }
        } else {
            *slow = 0;
            *self.degraded.lock() = false;
        }
        false
    }

    /// Is the degradation flag currently raised?
    pub fn is_degraded(&self) -> bool {
        *self.degraded.lock()
    }
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new(LatencyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window: usize, ceiling: u64, threshold: u32) -> CycleTracker {
        CycleTracker::new(LatencyConfig {
            window_size: window,
            slow_call_ceiling_ms: ceiling,
            breaker_threshold: threshold,
        })
    }

    #[test]
    fn test_stats_over_window() {
        let tracker = tracker(100, 8000, 3);
        for ms in [10, 20, 30, 40, 50] {
            tracker.record("llm", ms);
        }

        let stats = tracker.stats("llm").unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min_ms, 10);
        assert_eq!(stats.max_ms, 50);
        assert_eq!(stats.avg_ms, 30.0);
        assert_eq!(stats.p95_ms, 50);
    }

    #[test]
    fn test_window_is_bounded() {
        let tracker = tracker(3, 8000, 3);
        for ms in [1, 2, 3, 4, 5] {
            tracker.record("synth", ms);
        }
        let stats = tracker.stats("synth").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ms, 3); // oldest two evicted
    }

    #[test]
    fn test_stage_span_matching() {
        let tracker = tracker(100, 8000, 3);
        tracker.stage_start("call-1", "recognition");
        assert!(tracker.stage_complete("call-1", "recognition").is_some());
        // Unmatched completion returns None
        assert!(tracker.stage_complete("call-1", "recognition").is_none());
    }

    #[test]
    fn test_breaker_trips_on_consecutive_slow_calls() {
        let tracker = tracker(100, 1000, 3);
        assert!(!tracker.observe_call_latency("c", 1500));
        assert!(!tracker.observe_call_latency("c", 1600));
        assert!(tracker.observe_call_latency("c", 1700));
        assert!(tracker.is_degraded());

        // A fast call resets the run and clears the flag
        tracker.observe_call_latency("c", 200);
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn test_breaker_resets_on_fast_call() {
        let tracker = tracker(100, 1000, 3);
        tracker.observe_call_latency("c", 1500);
        tracker.observe_call_latency("c", 1500);
        tracker.observe_call_latency("c", 100); // resets the run
        assert!(!tracker.observe_call_latency("c", 1500));
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn test_cache_counters() {
        let tracker = tracker(100, 8000, 3);
        tracker.record_cache_hit();
        tracker.record_cache_hit();
        tracker.record_cache_miss();
        assert_eq!(tracker.cache_counts(), (2, 1));
    }
}
