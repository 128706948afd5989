//! Perf instrumentation — per-stage latency/outcome aggregates.
//!
//! Every pipeline stage wraps itself in a `StageTimer`. Recording must never
//! abort the wrapped operation: a poisoned lock is logged and swallowed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Default, Clone)]
struct StageStats {
    count: u64,
    errors: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

/// Aggregated view of one stage, as exposed by the perf route.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: String,
    pub count: u64,
    pub errors: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

/// Process-wide registry of per-stage measurements.
#[derive(Debug, Default)]
pub struct PerfRegistry {
    stats: Mutex<HashMap<String, StageStats>>,
}

impl PerfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a scoped measurement. Dropping the timer without calling
    /// `record` counts the stage as successful.
    pub fn start<'a>(&'a self, stage: &str) -> StageTimer<'a> {
        StageTimer {
            registry: self,
            stage: stage.to_string(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Snapshot of all stages, sorted by stage name.
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        let guard = match self.stats.lock() {
            Ok(g) => g,
            Err(_) => {
                warn!("perf registry lock poisoned; returning empty snapshot");
                return Vec::new();
            }
        };

        let mut stages: Vec<StageSnapshot> = guard
            .iter()
            .map(|(stage, s)| StageSnapshot {
                stage: stage.clone(),
                count: s.count,
                errors: s.errors,
                total_ms: s.total.as_millis() as u64,
                min_ms: s.min.unwrap_or_default().as_millis() as u64,
                max_ms: s.max.as_millis() as u64,
                avg_ms: if s.count > 0 {
                    s.total.as_secs_f64() * 1000.0 / s.count as f64
                } else {
                    0.0
                },
            })
            .collect();
        stages.sort_by(|a, b| a.stage.cmp(&b.stage));
        stages
    }

    fn record(&self, stage: &str, duration: Duration, ok: bool) {
        let mut guard = match self.stats.lock() {
            Ok(g) => g,
            Err(_) => {
                // Swallowed on purpose: perf recording must never fail the
                // operation it measures.
                warn!(stage, "perf registry lock poisoned; dropping measurement");
                return;
            }
        };

        let entry = guard.entry(stage.to_string()).or_default();
        entry.count += 1;
        if !ok {
            entry.errors += 1;
        }
        entry.total += duration;
        entry.min = Some(entry.min.map_or(duration, |m| m.min(duration)));
        entry.max = entry.max.max(duration);
    }
}

/// RAII measurement around one stage invocation.
pub struct StageTimer<'a> {
    registry: &'a PerfRegistry,
    stage: String,
    started: Instant,
    recorded: bool,
}

impl StageTimer<'_> {
    /// Records the elapsed time with an explicit outcome.
    pub fn record(mut self, ok: bool) {
        self.recorded = true;
        self.registry.record(&self.stage, self.started.elapsed(), ok);
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.registry
                .record(&self.stage, self.started.elapsed(), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_on_explicit_outcome() {
        let perf = PerfRegistry::new();
        perf.start("ingest.validate").record(true);
        perf.start("ingest.validate").record(false);

        let snap = perf.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].stage, "ingest.validate");
        assert_eq!(snap[0].count, 2);
        assert_eq!(snap[0].errors, 1);
    }

    #[test]
    fn test_timer_records_success_on_drop() {
        let perf = PerfRegistry::new();
        {
            let _t = perf.start("retrieve.query");
        }
        let snap = perf.snapshot();
        assert_eq!(snap[0].count, 1);
        assert_eq!(snap[0].errors, 0);
    }

    #[test]
    fn test_snapshot_sorted_by_stage_name() {
        let perf = PerfRegistry::new();
        perf.start("b.stage").record(true);
        perf.start("a.stage").record(true);
        let names: Vec<_> = perf.snapshot().into_iter().map(|s| s.stage).collect();
        assert_eq!(names, vec!["a.stage", "b.stage"]);
    }
}
