//! Sampling mode: per-trigger ring buffers, record decoding, and the
//! multi-observer wrappers.

use crate::config::SampleConfig;
use crate::count::{Group, Role};
use crate::error::{Error, Result};
use crate::event::{CounterDefinition, PeriodOrFrequency, Precision};
use crate::ffi::bindings::{self as b, perf_event_header};

mod multi;
mod rb;
mod record;
mod values;

pub use multi::{MultiCoreSampler, MultiProcessSampler, MultiThreadSampler};
pub use record::{
    Branch, CGroup, ContextSwitch, DataSource, Mode, Sample, Throttle, TransactionAbort, Weight,
};
pub use values::{BranchMask, Register, Registers, SampleValues};

use rb::RingBuffer;
use values::SampleMask;

/// One sampling trigger: an event name with optional per-trigger precision
/// and cadence overrides.
#[derive(Clone, Debug)]
pub struct Trigger {
    name: String,
    precision: Option<Precision>,
    period_or_frequency: Option<PeriodOrFrequency>,
}

impl Trigger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            precision: None,
            period_or_frequency: None,
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period_or_frequency = Some(PeriodOrFrequency::Period(period));
        self
    }

    pub fn with_frequency(mut self, frequency: u64) -> Self {
        self.period_or_frequency = Some(PeriodOrFrequency::Frequency(frequency));
        self
    }
}

impl From<&str> for Trigger {
    fn from(name: &str) -> Self {
        Trigger::new(name)
    }
}

// A trigger resolved against the definitions: the canonical name plus the
// user's overrides.
#[derive(Clone)]
struct ResolvedTrigger {
    name: String,
    precision: Option<Precision>,
    period_or_frequency: Option<PeriodOrFrequency>,
}

/// One opened trigger group paired with its ring buffer and the counter
/// names interpreting any embedded read block. Dropping releases the
/// buffer mapping and the descriptors.
struct SampleCounter {
    group: Group,
    buffer: RingBuffer,
    counter_names: Vec<String>,
}

impl Drop for SampleCounter {
    fn drop(&mut self) {
        self.group.close();
    }
}

/// The sampling engine.
///
/// Opens each trigger group in sampling mode, maps a ring buffer per group,
/// and decodes the kernel's binary record stream into [`Sample`] values.
///
/// # Examples
///
/// ```no_run
/// use perf_event_groups::config::SampleConfig;
/// use perf_event_groups::event::CounterDefinition;
/// use perf_event_groups::sample::{Sampler, Trigger};
///
/// let definitions = CounterDefinition::new();
/// let mut config = SampleConfig::default();
/// config.period(10_000);
///
/// let mut sampler = Sampler::new(&definitions, config);
/// sampler.trigger(vec![vec![Trigger::new("cycles")]]).unwrap();
/// sampler.values().time(true).instruction_pointer(true);
///
/// sampler.start().unwrap();
/// // ... measured region ...
/// sampler.stop().unwrap();
///
/// for sample in sampler.result(true) {
///     println!("{:?} at {:?}", sample.instruction_pointer, sample.time);
/// }
/// sampler.close();
/// ```
pub struct Sampler<'a> {
    definitions: &'a CounterDefinition,
    config: SampleConfig,
    values: SampleValues,
    triggers: Vec<Vec<ResolvedTrigger>>,
    sample_counters: Vec<SampleCounter>,
    is_opened: bool,
}

impl<'a> Sampler<'a> {
    pub fn new(definitions: &'a CounterDefinition, config: SampleConfig) -> Self {
        Self {
            definitions,
            config,
            values: SampleValues::default(),
            triggers: Vec::new(),
            sample_counters: Vec::new(),
            is_opened: false,
        }
    }

    /// The per-sample field selection, for chained configuration:
    /// `sampler.values().time(true).data_src(true)`.
    pub fn values(&mut self) -> &mut SampleValues {
        &mut self.values
    }

    pub(crate) fn set_values(&mut self, values: SampleValues) {
        self.values = values;
    }

    pub(crate) fn recorded_time(&self) -> bool {
        self.values.is_set(SampleMask::TIME)
    }

    /// Installs a single trigger event.
    pub fn trigger_name(&mut self, name: &str) -> Result<&mut Self> {
        self.trigger(vec![vec![Trigger::new(name)]])
    }

    /// Installs the trigger groups. Each inner list becomes one kernel
    /// group with its own ring buffer; metrics are rejected.
    pub fn trigger(&mut self, trigger_groups: Vec<Vec<Trigger>>) -> Result<&mut Self> {
        self.triggers.reserve(trigger_groups.len());

        for trigger_group in trigger_groups {
            let mut resolved_group = Vec::with_capacity(trigger_group.len());

            for trigger in trigger_group {
                // Metrics aggregate multiple events and cannot overflow.
                if self.definitions.is_metric(&trigger.name) {
                    return Err(Error::MetricAsTrigger(trigger.name));
                }
                let Some((canonical, _)) = self.definitions.counter(&trigger.name) else {
                    return Err(Error::UnknownName(trigger.name));
                };

                resolved_group.push(ResolvedTrigger {
                    name: canonical.to_string(),
                    precision: trigger.precision,
                    period_or_frequency: trigger.period_or_frequency,
                });
            }

            self.triggers.push(resolved_group);
        }

        Ok(self)
    }

    /// Opens every trigger group and maps its ring buffer. A no-op when
    /// already open; [`close`][Self::close] allows reopening.
    pub fn open(&mut self) -> Result<()> {
        if self.is_opened {
            return Ok(());
        }

        if self.triggers.is_empty() {
            return Err(Error::NoTriggers);
        }

        let result = self.open_trigger_groups();
        if result.is_err() {
            // Descriptors and mappings acquired so far must not outlive the
            // failure.
            self.sample_counters.clear();
        } else {
            self.is_opened = true;
        }
        result
    }

    fn open_trigger_groups(&mut self) -> Result<()> {
        for index in 0..self.triggers.len() {
            let trigger_group = self.triggers[index].clone();
            let sample_counter = self.open_one_group(&trigger_group)?;
            self.sample_counters.push(sample_counter);
        }
        Ok(())
    }

    fn open_one_group(&self, triggers: &[ResolvedTrigger]) -> Result<SampleCounter> {
        let mut group = Group::new();
        let mut counter_names = Vec::new();
        let read_values = self.values.is_set(SampleMask::READ);

        for trigger in triggers {
            let Some((canonical, mut config)) = self.definitions.counter(&trigger.name) else {
                return Err(Error::UnknownName(trigger.name.clone()));
            };

            let precision = trigger.precision.unwrap_or(self.config.precision);
            config.precise_ip(precision as u8);

            match trigger
                .period_or_frequency
                .unwrap_or(self.config.period_or_frequency)
            {
                PeriodOrFrequency::Period(period) => config.period(period),
                PeriodOrFrequency::Frequency(frequency) => config.frequency(frequency),
            }

            if read_values {
                counter_names.push(canonical.to_string());
            }
            group.add(config);
        }

        // Counters read on every sample join the same kernel group.
        if read_values {
            for name in self.values.counter_names() {
                if self.definitions.is_metric(name) {
                    return Err(Error::MetricAsTrigger(name.clone()));
                }
                let Some((canonical, config)) = self.definitions.counter(name) else {
                    return Err(Error::UnknownName(name.clone()));
                };
                counter_names.push(canonical.to_string());
                group.add(config);
            }
        }

        if group.is_empty() {
            return Err(Error::EmptyGroup);
        }

        // On Sapphire Rapids and friends the leader is an auxiliary event;
        // the second member is the actual sampling source and mmap target.
        let leader_is_auxiliary = group.member(0).is_auxiliary();

        let mut leader_fd = -1;
        for index in 0..group.size() {
            let role = match index {
                0 => Role::Leader,
                1 if leader_is_auxiliary => Role::SecretLeader,
                _ => Role::Member,
            };

            let counter = group.member_mut(index);
            counter.open(&self.config.base, role, leader_fd, read_values, Some(&self.values))?;

            if index == 0 {
                leader_fd = counter.file_descriptor();
            }
        }

        let buffer_fd = if leader_is_auxiliary && group.size() > 1 {
            group.member(1).file_descriptor()
        } else {
            leader_fd
        };

        let buffer = RingBuffer::new(buffer_fd, self.config.buffer_pages)?;

        Ok(SampleCounter {
            group,
            buffer,
            counter_names,
        })
    }

    /// Opens (if necessary) and enables every trigger group.
    pub fn start(&mut self) -> Result<()> {
        self.open()?;

        for sample_counter in &self.sample_counters {
            sample_counter.group.enable()?;
        }
        Ok(())
    }

    /// Disables every trigger group. Buffers stay mapped so that
    /// [`result`][Self::result] can still decode them.
    pub fn stop(&mut self) -> Result<()> {
        for sample_counter in &self.sample_counters {
            sample_counter.group.disable()?;
        }
        Ok(())
    }

    /// Releases buffers and descriptors. Idempotent; the sampler can be
    /// opened again afterwards.
    pub fn close(&mut self) {
        if std::mem::take(&mut self.is_opened) {
            self.sample_counters.clear();
        }
    }

    /// Decodes every ring buffer into samples.
    ///
    /// Within one buffer, records come back in kernel write order. With
    /// `sort_by_time` the buffers are merged into one timeline, provided
    /// timestamps were recorded.
    pub fn result(&self, sort_by_time: bool) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(2048);

        for sample_counter in &self.sample_counters {
            for (header, payload) in sample_counter.buffer.records() {
                if let Some(sample) =
                    decode_record(&header, payload, &self.values, &sample_counter.counter_names)
                {
                    samples.push(sample);
                }
            }
        }

        if sort_by_time && self.recorded_time() {
            samples.sort_by_key(|sample| sample.time);
        }

        samples
    }
}

// Dispatch on the record type; unknown types are skipped entirely (the
// cursor already advanced by the advertised size).
fn decode_record(
    header: &perf_event_header,
    payload: *const u8,
    values: &SampleValues,
    counter_names: &[String],
) -> Option<Sample> {
    match header.type_ {
        b::PERF_RECORD_SAMPLE => {
            Some(unsafe { Sample::from_sample_record(payload, header.misc, values, counter_names) })
        }
        b::PERF_RECORD_LOST => {
            Some(unsafe { Sample::from_loss_record(payload, header.misc, values) })
        }
        #[cfg(feature = "linux-4.3")]
        b::PERF_RECORD_SWITCH => {
            Some(unsafe { Sample::from_context_switch_record(payload, header.misc, values, false) })
        }
        #[cfg(feature = "linux-4.3")]
        b::PERF_RECORD_SWITCH_CPU_WIDE => {
            Some(unsafe { Sample::from_context_switch_record(payload, header.misc, values, true) })
        }
        #[cfg(feature = "linux-5.7")]
        b::PERF_RECORD_CGROUP => Some(unsafe { Sample::from_cgroup_record(payload, header.misc) }),
        b::PERF_RECORD_THROTTLE if values.is_include_throttle() => {
            Some(unsafe { Sample::from_throttle_record(payload, header.misc, values, true) })
        }
        b::PERF_RECORD_UNTHROTTLE if values.is_include_throttle() => {
            Some(unsafe { Sample::from_throttle_record(payload, header.misc, values, false) })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::rb::Records;
    use super::*;
    use crate::config::Config;
    use crate::ffi::PAGE_SIZE;

    #[test]
    fn starting_without_triggers_fails() {
        let definitions = CounterDefinition::new();
        let mut sampler = Sampler::new(&definitions, SampleConfig::default());
        assert!(matches!(sampler.start(), Err(Error::NoTriggers)));
    }

    #[test]
    fn metrics_are_rejected_as_triggers() {
        let definitions = CounterDefinition::new();
        let mut sampler = Sampler::new(&definitions, SampleConfig::default());
        assert!(matches!(
            sampler.trigger(vec![vec![Trigger::new("ipc")]]),
            Err(Error::MetricAsTrigger(name)) if name == "ipc"
        ));
    }

    #[test]
    fn unknown_triggers_are_rejected() {
        let definitions = CounterDefinition::new();
        let mut sampler = Sampler::new(&definitions, SampleConfig::default());
        assert!(matches!(
            sampler.trigger_name("no-such-event"),
            Err(Error::UnknownName(name)) if name == "no-such-event"
        ));
    }

    // Synthetic end-to-end decode: a hand-built buffer region walked and
    // decoded exactly like a kernel-filled one.
    #[test]
    fn buffer_walk_decodes_mixed_records() {
        let mut values = SampleValues::new();
        values.time(true).instruction_pointer(true).throttle(true);

        let mut data: Vec<u8> = Vec::new();
        let mut push_record = |type_: u32, misc: u16, payload: &[u8], data: &mut Vec<u8>| {
            let size = (8 + payload.len()) as u16;
            data.extend_from_slice(&type_.to_ne_bytes());
            data.extend_from_slice(&misc.to_ne_bytes());
            data.extend_from_slice(&size.to_ne_bytes());
            data.extend_from_slice(payload);
        };

        // A sample: ip then time.
        let mut sample_payload = Vec::new();
        sample_payload.extend_from_slice(&0x4000_u64.to_ne_bytes());
        sample_payload.extend_from_slice(&200_u64.to_ne_bytes());
        push_record(
            b::PERF_RECORD_SAMPLE,
            b::PERF_RECORD_MISC_USER,
            &sample_payload,
            &mut data,
        );

        // An unknown record type that must be skipped by its size.
        push_record(0x7777, 0, &[0; 32], &mut data);

        // A loss record: id, lost, then the sample_id trailer (time).
        let mut loss_payload = Vec::new();
        loss_payload.extend_from_slice(&5_u64.to_ne_bytes());
        loss_payload.extend_from_slice(&321_u64.to_ne_bytes());
        loss_payload.extend_from_slice(&100_u64.to_ne_bytes());
        push_record(b::PERF_RECORD_LOST, 0, &loss_payload, &mut data);

        let data_head = data.len() as u64;
        let mut buffer = vec![0_u8; PAGE_SIZE];
        buffer.extend_from_slice(&data);

        let mut samples = Vec::new();
        for (header, payload) in Records::new(buffer.as_ptr(), buffer.len(), data_head, 0) {
            if let Some(sample) = decode_record(&header, payload, &values, &[]) {
                samples.push(sample);
            }
        }

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].instruction_pointer, Some(0x4000));
        assert_eq!(samples[0].time, Some(200));
        assert_eq!(samples[1].count_loss, Some(321));
        assert_eq!(samples[1].time, Some(100));

        // Sorting by time interleaves the records.
        samples.sort_by_key(|sample| sample.time);
        assert_eq!(samples[0].count_loss, Some(321));
        assert_eq!(samples[1].instruction_pointer, Some(0x4000));
    }

    #[test]
    fn sample_cycles_end_to_end() {
        let definitions = CounterDefinition::new();
        let mut config = SampleConfig::default();
        // A cadence coarse enough that the samples comfortably fit the
        // buffer, which stays below the unprivileged perf_event_mlock_kb
        // budget.
        config.period(100_000);
        config.buffer_pages = 1 + 64;
        config.base = Config {
            include_kernel: false,
            include_hypervisor: false,
            ..Config::default()
        };

        let mut sampler = Sampler::new(&definitions, config);
        sampler.trigger_name("cycles").unwrap();
        sampler
            .values()
            .time(true)
            .instruction_pointer(true)
            .cpu_id(true);

        // Sampling needs more clearance than counting; skip quietly when
        // the environment denies it.
        if sampler.start().is_err() {
            return;
        }

        let mut value = 0_u64;
        for index in 0..50_000_000_u64 {
            value = std::hint::black_box(value.wrapping_add(index));
        }

        sampler.stop().unwrap();
        let samples = sampler.result(true);

        assert!(!samples.is_empty());
        let times: Vec<u64> = samples.iter().filter_map(|sample| sample.time).collect();
        assert_eq!(times.len(), samples.len());
        assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));

        sampler.close();

        // Closing releases the buffers; reopening is allowed.
        assert!(sampler.result(true).is_empty());
        sampler.start().unwrap();
        sampler.stop().unwrap();
        sampler.close();
    }
}
