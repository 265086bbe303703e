//! Opt-in phase timing for the forward and decode paths
//!
//! Disabled by default so it never affects production throughput; when
//! enabled it records wall-clock time per model phase and renders a small
//! table. Telemetry only - it never changes computed outputs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// The phases of a language-model forward or decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Token id lookup
    Embed,
    /// Full-sequence masked recurrence
    Encode,
    /// Output projection / log-softmax
    Project,
    /// Loss and perplexity reduction
    Loss,
    /// Single-step incremental recurrence
    Step,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Thread-safe collector of per-phase timings
pub struct Tracer {
    measurements: Mutex<Vec<(Phase, Duration)>>,
    enabled: Mutex<bool>,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            measurements: Mutex::new(Vec::new()),
            enabled: Mutex::new(false),
        }
    }

    pub fn enable(&self) {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn disable(&self) {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure, recording its duration under `phase` when enabled
    #[inline]
    pub fn span<F, R>(&self, phase: Phase, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.is_enabled() {
            return f();
        }
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.measurements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((phase, elapsed));
        result
    }

    /// Drop all recorded measurements
    pub fn clear(&self) {
        self.measurements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Render the per-phase totals as a table
    pub fn report(&self) -> String {
        let measurements = self.measurements.lock().unwrap_or_else(PoisonError::into_inner);
        if measurements.is_empty() {
            return "no measurements recorded; enable tracing with TRACER.enable()".to_string();
        }

        let mut totals: HashMap<Phase, Duration> = HashMap::new();
        let mut counts: HashMap<Phase, usize> = HashMap::new();
        let mut total_time = Duration::ZERO;
        for &(phase, duration) in measurements.iter() {
            *totals.entry(phase).or_default() += duration;
            *counts.entry(phase).or_default() += 1;
            total_time += duration;
        }

        let mut sorted: Vec<_> = totals.keys().copied().collect();
        sorted.sort_by(|a, b| totals[b].cmp(&totals[a]));

        let mut out = format!("total measured time: {total_time:.2?}\n");
        out.push_str(&format!(
            "{:<10} | {:<8} | {:<12} | {:<8}\n",
            "Phase", "Count", "Duration", "% Time"
        ));
        for phase in sorted {
            let duration = totals[&phase];
            let pct = if total_time.as_nanos() > 0 {
                duration.as_secs_f64() / total_time.as_secs_f64() * 100.0
            } else {
                0.0
            };
            out.push_str(&format!(
                "{:<10} | {:<8} | {:<12.2?} | {:>7.2}%\n",
                phase.to_string(),
                counts[&phase],
                duration,
                pct
            ));
        }
        out
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Global tracer instance
pub static TRACER: LazyLock<Tracer> = LazyLock::new(Tracer::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Embed.to_string(), "Embed");
        assert_eq!(Phase::Encode.to_string(), "Encode");
        assert_eq!(Phase::Project.to_string(), "Project");
        assert_eq!(Phase::Loss.to_string(), "Loss");
        assert_eq!(Phase::Step.to_string(), "Step");
    }

    #[test]
    fn test_disabled_span_passes_through() {
        let tracer = Tracer::new();
        assert!(!tracer.is_enabled());
        let result = tracer.span(Phase::Encode, || 42);
        assert_eq!(result, 42);
        assert!(tracer.report().contains("no measurements"));
    }

    #[test]
    fn test_enabled_span_records() {
        let tracer = Tracer::new();
        tracer.enable();
        let result = tracer.span(Phase::Project, || "done");
        assert_eq!(result, "done");
        let report = tracer.report();
        assert!(report.contains("Project"));
        assert!(report.contains("% Time"));
    }

    #[test]
    fn test_clear_resets() {
        let tracer = Tracer::new();
        tracer.enable();
        tracer.span(Phase::Loss, || ());
        tracer.clear();
        assert!(tracer.report().contains("no measurements"));
    }

    #[test]
    fn test_enable_disable_toggle() {
        let tracer = Tracer::new();
        tracer.enable();
        assert!(tracer.is_enabled());
        tracer.disable();
        assert!(!tracer.is_enabled());
    }
}
