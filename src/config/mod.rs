//! Measurement configuration for counting and sampling.

use crate::event::{PeriodOrFrequency, Precision};

/// Configuration shared by counting and sampling: capacity limits, which
/// execution contexts to include, and the observed process/CPU.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of kernel groups per [`EventCounter`][crate::count::EventCounter].
    pub max_groups: u8,
    /// Maximum number of counters packed into one kernel group.
    pub max_counters_per_group: u8,

    /// Monitor child threads spawned by the observed thread.
    pub include_child_threads: bool,
    /// Monitor kernel-level activity.
    pub include_kernel: bool,
    /// Monitor user-level activity.
    pub include_user: bool,
    /// Monitor hypervisor-level activity.
    pub include_hypervisor: bool,
    /// Monitor the idle task.
    pub include_idle: bool,
    /// Monitor guest-mode activity.
    pub include_guest: bool,

    /// Dump every assembled kernel attribute to stderr when opening, which is
    /// useful when debugging counter configurations.
    pub debug: bool,

    /// CPU to monitor; `None` means any CPU.
    pub cpu_id: Option<u16>,
    /// Process to monitor: `0` is the calling process, `-1` every process,
    /// a positive value a specific pid.
    pub process_id: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_groups: 5,
            max_counters_per_group: 4,
            include_child_threads: false,
            include_kernel: true,
            include_user: true,
            include_hypervisor: true,
            include_idle: true,
            include_guest: true,
            debug: false,
            cpu_id: None,
            process_id: 0,
        }
    }
}

/// Sampling configuration: everything in [`Config`] plus the ring-buffer
/// size and the default cadence and precision for triggers that do not
/// override them.
#[derive(Clone, Debug)]
pub struct SampleConfig {
    pub base: Config,

    /// Pages allocated per ring buffer: one metadata page plus a
    /// power-of-two number of data pages.
    pub buffer_pages: usize,

    /// Default cadence for triggers without an explicit period/frequency.
    pub period_or_frequency: PeriodOrFrequency,

    /// Default precision for triggers without an explicit one. Constant skid
    /// by default, which enables PEBS on Intel.
    pub precision: Precision,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            base: Config::default(),
            buffer_pages: 8192 + 1,
            period_or_frequency: PeriodOrFrequency::Period(4000),
            precision: Precision::MustHaveConstantSkid,
        }
    }
}

impl SampleConfig {
    pub fn period(&mut self, period: u64) {
        self.period_or_frequency = PeriodOrFrequency::Period(period);
    }

    pub fn frequency(&mut self, frequency: u64) {
        self.period_or_frequency = PeriodOrFrequency::Frequency(frequency);
    }
}
