use std::fs::File;
use std::io;
use std::mem::size_of;
use std::os::fd::RawFd;
use std::slice;

use super::{Counter, Role};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::CounterConfig;
use crate::ffi::bindings as b;
use crate::ffi::syscall::{ioctl_arg, read};

/// Number of maximal members per group.
pub(crate) const MAX_MEMBERS: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ReadValue {
    pub value: u64,
    pub id: u64,
}

/// The kernel's `read_format` shape for
/// `PERF_FORMAT_GROUP | PERF_FORMAT_ID | PERF_FORMAT_TOTAL_TIME_ENABLED |
/// PERF_FORMAT_TOTAL_TIME_RUNNING`, sized for a full group.
// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L344
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct GroupReadFormat {
    pub count_members: u64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub values: [ReadValue; MAX_MEMBERS],
}

/// An ordered bundle of counters scheduled onto the PMU as a unit: the
/// kernel puts the group on the hardware only when every member fits, so
/// member values are directly comparable.
///
/// The first member is the group leader; reads and ioctls target its
/// descriptor.
pub struct Group {
    members: Vec<Counter>,
    start_value: GroupReadFormat,
    end_value: GroupReadFormat,
    multiplexing_correction: f64,
}

impl Group {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            start_value: GroupReadFormat::default(),
            end_value: GroupReadFormat::default(),
            multiplexing_correction: 0.0,
        }
    }

    /// Appends an event to the group. Capacity discipline is the caller's
    /// business: [`EventCounter`][super::EventCounter] packs at most
    /// `max_counters_per_group` and the kernel read format carries up to
    /// [`MAX_MEMBERS`] values.
    pub fn add(&mut self, config: CounterConfig) {
        self.members.push(Counter::new(config));
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The leader's descriptor, or -1 for an empty (or closed) group.
    pub fn leader_file_descriptor(&self) -> RawFd {
        self.members
            .first()
            .map(Counter::file_descriptor)
            .unwrap_or(-1)
    }

    pub fn member(&self, index: usize) -> &Counter {
        &self.members[index]
    }

    pub(crate) fn member_mut(&mut self, index: usize) -> &mut Counter {
        &mut self.members[index]
    }

    /// Opens all members in insertion order for counting. Member 0 opens as
    /// the leader; the rest pass its descriptor.
    pub fn open(&mut self, config: &Config) -> Result<()> {
        let mut leader_fd = -1;

        for (index, counter) in self.members.iter_mut().enumerate() {
            let role = if index == 0 { Role::Leader } else { Role::Member };
            counter.open(config, role, leader_fd, true, None)?;

            if index == 0 {
                leader_fd = counter.file_descriptor();
            }
        }

        Ok(())
    }

    /// Resets and enables the group, then snapshots the start values.
    ///
    /// The start read happens immediately after `ENABLE` so the window
    /// between the two stays as small as the two syscalls allow.
    pub fn start(&mut self) -> Result<()> {
        let start_value = {
            let leader = self.leader().ok_or(Error::EmptyGroup)?;

            ioctl_arg(leader, b::PERF_EVENT_IOC_RESET, 0).map_err(|_| Error::StartFailure)?;
            ioctl_arg(leader, b::PERF_EVENT_IOC_ENABLE, 0).map_err(|_| Error::StartFailure)?;

            read_values(leader)
                .map_err(|_| Error::StartFailure)?
                .ok_or(Error::StartFailure)?
        };

        self.start_value = start_value;
        Ok(())
    }

    /// Snapshots the end values, disables the group, and fixes the
    /// multiplexing correction for subsequent [`get`][Self::get] calls.
    pub fn stop(&mut self) -> Result<()> {
        let end_value = {
            let leader = self.leader().ok_or(Error::EmptyGroup)?;

            let end_value = read_values(leader)
                .map_err(|_| Error::StopFailure)?
                .ok_or(Error::StopFailure)?;
            ioctl_arg(leader, b::PERF_EVENT_IOC_DISABLE, 0).map_err(|_| Error::StopFailure)?;
            end_value
        };
        self.end_value = end_value;

        let time_enabled = self.end_value.time_enabled - self.start_value.time_enabled;
        let time_running = self.end_value.time_running - self.start_value.time_running;
        // A group the kernel never scheduled has no meaningful counts;
        // define the correction as 0 so every value reads as 0.
        self.multiplexing_correction = if time_running > 0 {
            time_enabled as f64 / time_running as f64
        } else {
            0.0
        };

        Ok(())
    }

    /// The measured value of member `index`, corrected for multiplexing.
    /// Unknown indices and ids missing from a snapshot read as 0.
    pub fn get(&self, index: usize) -> f64 {
        let Some(counter) = self.members.get(index) else {
            return 0.0;
        };

        let start = value_for_id(&self.start_value, counter.id());
        let end = value_for_id(&self.end_value, counter.id());

        match (start, end) {
            (Some(start), Some(end)) => {
                let delta = end.saturating_sub(start) as f64;
                delta * self.multiplexing_correction
            }
            _ => 0.0,
        }
    }

    /// Closes all members in order. Idempotent.
    pub fn close(&mut self) {
        for counter in &mut self.members {
            counter.close();
        }
    }

    pub(crate) fn enable(&self) -> Result<()> {
        let leader = self.leader().ok_or(Error::EmptyGroup)?;
        ioctl_arg(leader, b::PERF_EVENT_IOC_ENABLE, 0).map_err(|_| Error::StartFailure)?;
        Ok(())
    }

    pub(crate) fn disable(&self) -> Result<()> {
        let leader = self.leader().ok_or(Error::EmptyGroup)?;
        ioctl_arg(leader, b::PERF_EVENT_IOC_DISABLE, 0).map_err(|_| Error::StopFailure)?;
        Ok(())
    }

    fn leader(&self) -> Option<&File> {
        self.members.first().and_then(Counter::file)
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

// Linear scan over the at most MAX_MEMBERS snapshot entries.
fn value_for_id(values: &GroupReadFormat, id: u64) -> Option<u64> {
    let count = (values.count_members as usize).min(MAX_MEMBERS);
    values.values[..count]
        .iter()
        .find(|value| value.id == id)
        .map(|value| value.value)
}

fn read_values(leader: &File) -> io::Result<Option<GroupReadFormat>> {
    let mut values = GroupReadFormat::default();
    let buf = unsafe {
        slice::from_raw_parts_mut(
            &mut values as *mut GroupReadFormat as *mut u8,
            size_of::<GroupReadFormat>(),
        )
    };
    let bytes = read(leader, buf)?;
    Ok((bytes > 0).then_some(values))
}

#[cfg(test)]
mod tests {
    use super::super::tests::perf_unavailable;
    use super::*;
    use crate::event::CounterDefinition;

    fn group_of(names: &[&str]) -> Group {
        let definitions = CounterDefinition::new();
        let mut group = Group::new();
        for name in names {
            let (_, config) = definitions.counter(name).unwrap();
            group.add(config);
        }
        group
    }

    #[test]
    fn empty_group_cannot_start_or_stop() {
        let mut group = Group::new();
        assert!(matches!(group.start(), Err(Error::EmptyGroup)));
        assert!(matches!(group.stop(), Err(Error::EmptyGroup)));
        assert_eq!(group.leader_file_descriptor(), -1);
    }

    #[test]
    fn missing_id_reads_as_zero() {
        let group = group_of(&["instructions"]);
        // Never opened: no snapshot contains the (zero) id.
        assert_eq!(group.get(0), 0.0);
        assert_eq!(group.get(17), 0.0);
    }

    #[test]
    fn zero_work_region_counts_close_to_zero() {
        if perf_unavailable() {
            return;
        }

        let mut group = group_of(&["instructions", "cycles"]);
        group.open(&Config::default()).unwrap();
        group.start().unwrap();
        group.stop().unwrap();

        // Nothing ran between start and stop; a few thousand instructions of
        // measurement overhead are the upper bound.
        let instructions = group.get(0);
        assert!(instructions >= 0.0);
        assert!(instructions < 100_000.0 * group.multiplexing_correction.max(1.0));

        // A two-member group fits the PMU, so enabled == running.
        assert!(group.multiplexing_correction >= 1.0);

        group.close();
    }

    #[test]
    fn measurements_are_independent_across_reopen() {
        if perf_unavailable() {
            return;
        }

        let mut group = group_of(&["instructions"]);
        group.open(&Config::default()).unwrap();
        group.start().unwrap();
        let mut value = 0_u64;
        for index in 0..100_000_u64 {
            value = std::hint::black_box(value.wrapping_add(index));
        }
        group.stop().unwrap();
        let first = group.get(0);
        group.close();

        group.open(&Config::default()).unwrap();
        group.start().unwrap();
        group.stop().unwrap();
        let second = group.get(0);
        group.close();

        assert!(first > 0.0);
        // The second region did no work, so it must not inherit the first
        // region's count.
        assert!(second < first);
    }
}
