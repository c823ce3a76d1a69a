//! Derived metrics: scalars computed from one or more hardware counter
//! values after a measurement.

use crate::count::CounterResult;

/// A user-visible value calculated from hardware counter results.
///
/// Adding a metric to an
/// [`EventCounter`][crate::count::EventCounter] pulls in its required
/// counters as hidden events; after stopping, the metric is evaluated
/// against their values.
pub trait Metric: Send + Sync {
    /// Name under which the metric is requested and reported.
    fn name(&self) -> &str;

    /// Names of the hardware counters this metric needs.
    fn required_counter_names(&self) -> Vec<&str>;

    /// Computes the metric from the given counter values. Returns `None` if
    /// a required value is missing or the metric is undefined (e.g. division
    /// by zero).
    fn calculate(&self, result: &CounterResult) -> Option<f64>;
}

fn ratio(result: &CounterResult, dividend: &str, divisor: &str) -> Option<f64> {
    let dividend = result.get(dividend)?;
    let divisor = result.get(divisor)?;
    (divisor != 0.0).then(|| dividend / divisor)
}

/// Retired instructions per CPU cycle.
pub struct InstructionsPerCycle;

impl Metric for InstructionsPerCycle {
    fn name(&self) -> &str {
        "ipc"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["instructions", "cycles"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        ratio(result, "instructions", "cycles")
    }
}

/// CPU cycles spent per retired instruction.
pub struct CyclesPerInstruction;

impl Metric for CyclesPerInstruction {
    fn name(&self) -> &str {
        "cycles-per-instruction"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["cycles", "instructions"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        ratio(result, "cycles", "instructions")
    }
}

/// Fraction of cache references that hit.
pub struct CacheHitRatio;

impl Metric for CacheHitRatio {
    fn name(&self) -> &str {
        "cache-hit-ratio"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["cache-misses", "cache-references"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        let misses = result.get("cache-misses")?;
        let references = result.get("cache-references")?;
        (references != 0.0).then(|| (references - misses) / references)
    }
}

/// Fraction of data-TLB loads that miss.
pub struct DTLBMissRatio;

impl Metric for DTLBMissRatio {
    fn name(&self) -> &str {
        "dTLB-miss-ratio"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["dTLB-load-misses", "dTLB-loads"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        ratio(result, "dTLB-load-misses", "dTLB-loads")
    }
}

/// Fraction of instruction-TLB loads that miss.
pub struct ITLBMissRatio;

impl Metric for ITLBMissRatio {
    fn name(&self) -> &str {
        "iTLB-miss-ratio"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["iTLB-load-misses", "iTLB-loads"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        ratio(result, "iTLB-load-misses", "iTLB-loads")
    }
}

/// Fraction of L1 data-cache loads that miss.
pub struct L1DataMissRatio;

impl Metric for L1DataMissRatio {
    fn name(&self) -> &str {
        "L1-data-miss-ratio"
    }

    fn required_counter_names(&self) -> Vec<&str> {
        vec!["L1-dcache-load-misses", "L1-dcache-loads"]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        ratio(result, "L1-dcache-load-misses", "L1-dcache-loads")
    }
}
