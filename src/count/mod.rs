//! Counting mode: single counters, kernel-scheduled groups, and the
//! name-driven [`EventCounter`] front end.

use std::fmt::Write as _;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{CounterConfig, Precision};
use crate::ffi::bindings as b;
use crate::ffi::syscall::{ioctl_argp, perf_event_open};
use crate::ffi::Attr;
use crate::sample::SampleValues;

mod event_counter;
mod group;
mod multi;
mod result;

pub use event_counter::EventCounter;
pub use group::Group;
pub use multi::{MultiCoreEventCounter, MultiProcessEventCounter, MultiThreadEventCounter};
pub use result::CounterResult;

/// Position of a counter within its kernel group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    /// First member; target of all ioctls and reads.
    Leader,
    /// Second member behind an auxiliary leader. Carries the sampling
    /// attributes and the ring-buffer mapping instead of the leader.
    SecretLeader,
    Member,
}

/// One hardware event opened via `perf_event_open`.
///
/// Exclusively owns its file descriptor; dropping or closing releases it,
/// and closing twice is a no-op.
pub struct Counter {
    config: CounterConfig,
    attr: Attr,
    id: u64,
    perf: Option<File>,
}

impl Counter {
    pub(crate) fn new(config: CounterConfig) -> Self {
        Self {
            config,
            attr: Attr::default(),
            id: 0,
            perf: None,
        }
    }

    /// Kernel-assigned id, queried right after a successful open.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The raw descriptor, or -1 when the counter is closed.
    pub fn file_descriptor(&self) -> RawFd {
        self.perf.as_ref().map(|file| file.as_raw_fd()).unwrap_or(-1)
    }

    pub(crate) fn file(&self) -> Option<&File> {
        self.perf.as_ref()
    }

    /// True for the auxiliary event that must lead a memory-sampling group
    /// on recent Intel architectures.
    pub fn is_auxiliary(&self) -> bool {
        self.config.is_auxiliary()
    }

    /// The precision the kernel actually accepted, which may be lower than
    /// the one requested after fallback, never higher.
    pub fn effective_precision(&self) -> Precision {
        Precision::from(self.attr.precise_ip() as u8)
    }

    /// Opens the counter.
    ///
    /// Assembles the kernel attribute from the event config, the measurement
    /// config and the role, then issues `perf_event_open`. In sampling mode
    /// (`sampling` present) the open is retried with decreasing `precise_ip`
    /// while the kernel answers `EINVAL` or `EOPNOTSUPP`; counting-mode opens
    /// attempt once.
    pub(crate) fn open(
        &mut self,
        config: &Config,
        role: Role,
        group_fd: RawFd,
        read_format: bool,
        sampling: Option<&SampleValues>,
    ) -> Result<()> {
        let mut attr = Attr::default();
        attr.type_ = self.config.type_();
        attr.size = std::mem::size_of::<Attr>() as _;
        attr.config = self.config.event_id();
        attr.config1 = self.config.event_id_extension()[0];
        attr.config2 = self.config.event_id_extension()[1];

        // Non-leaders inherit the leader's enabled/disabled state.
        attr.set_disabled(role == Role::Leader);

        attr.set_inherit(config.include_child_threads);
        attr.set_exclude_kernel(!config.include_kernel);
        attr.set_exclude_user(!config.include_user);
        attr.set_exclude_hv(!config.include_hypervisor);
        attr.set_exclude_idle(!config.include_idle);
        attr.set_exclude_guest(!config.include_guest);

        if let Some(values) = sampling {
            // Sampling fields live on the event the records are drawn from:
            // the leader, or the secret leader behind an auxiliary one.
            if role == Role::Leader || role == Role::SecretLeader {
                attr.sample_type = values.sample_type_bits();
                attr.set_sample_id_all(true);

                attr.set_freq(self.config.is_frequency());
                attr.sample_period_or_freq = self.config.period_or_frequency();

                let branch_bits = values.branch_bits();
                if branch_bits > 0 {
                    attr.branch_sample_type = branch_bits;
                }

                #[cfg(feature = "linux-4.8")]
                if let Some(max_stack) = values.max_stack() {
                    attr.sample_max_stack = max_stack;
                }

                let user_regs = values.user_register_mask();
                if user_regs > 0 {
                    attr.sample_regs_user = user_regs;
                }

                if let Some(stack_bytes) = values.user_stack_bytes() {
                    attr.sample_stack_user = stack_bytes;
                }

                let kernel_regs = values.kernel_register_mask();
                if kernel_regs > 0 {
                    attr.sample_regs_intr = kernel_regs;
                }

                #[cfg(feature = "linux-4.3")]
                attr.set_context_switch(values.is_include_context_switch());

                #[cfg(feature = "linux-5.7")]
                attr.set_cgroup(values.is_include_cgroup());
            }
        }

        if read_format {
            attr.read_format = b::PERF_FORMAT_GROUP | b::PERF_FORMAT_ID;
            if role == Role::Leader {
                attr.read_format |= b::PERF_FORMAT_TOTAL_TIME_ENABLED | b::PERF_FORMAT_TOTAL_TIME_RUNNING;
            }
        }

        let cpu_id = config.cpu_id.map(i32::from).unwrap_or(-1);
        let group_fd = if role == Role::Leader { -1 } else { group_fd };

        let open = |attr: &Attr| perf_event_open(attr, config.process_id, cpu_id, group_fd, 0);

        let opened = if sampling.is_some() {
            // The requested precision may be stricter than the PMU supports;
            // walk it down until the kernel stops objecting.
            let mut precise_ip = i32::from(self.config.requested_precise_ip());
            loop {
                attr.set_precise_ip(precise_ip as u64);
                match open(&attr) {
                    Ok(file) => break Ok(file),
                    Err(e) => {
                        let errno = e.raw_os_error().unwrap_or(0);
                        precise_ip -= 1;
                        if precise_ip < 0 || (errno != libc::EINVAL && errno != libc::EOPNOTSUPP) {
                            break Err(e);
                        }
                    }
                }
            }
        } else {
            open(&attr)
        };

        self.attr = attr;

        let result = match opened {
            Ok(file) => {
                let mut id = 0_u64;
                ioctl_argp(&file, b::PERF_EVENT_IOC_ID, &mut id).map_err(Error::open)?;
                self.id = id;
                self.perf = Some(file);
                Ok(())
            }
            Err(e) => Err(Error::open(e)),
        };

        if config.debug {
            eprintln!("{}", self.describe(role, group_fd, config.process_id, cpu_id));
        }

        result
    }

    /// Closes the counter and resets the descriptor. Idempotent.
    pub fn close(&mut self) {
        self.perf = None;
    }

    /// Human-readable dump of the assembled attribute, printed when
    /// [`Config::debug`][crate::config::Config::debug] is set.
    fn describe(&self, role: Role, group_fd: RawFd, process_id: i32, cpu_id: i32) -> String {
        let mut out = String::new();
        let attr = &self.attr;

        let _ = writeln!(out, "Counter:");
        let _ = writeln!(out, "    id: {}", self.id);
        let _ = writeln!(out, "    file_descriptor: {}", self.file_descriptor());
        match role {
            Role::Leader => {
                let _ = writeln!(out, "    role: group leader");
            }
            Role::SecretLeader => {
                let _ = writeln!(out, "    role: secret leader (leader fd {})", group_fd);
            }
            Role::Member => {
                let _ = writeln!(out, "    role: group member (leader fd {})", group_fd);
            }
        }
        let process = match process_id {
            0 => "calling".to_string(),
            id if id > 0 => format!("{id}"),
            _ => "all".to_string(),
        };
        let _ = writeln!(out, "    process: {process}");
        let cpu = if cpu_id >= 0 { format!("{cpu_id}") } else { "any".to_string() };
        let _ = writeln!(out, "    cpu: {cpu}");

        let _ = writeln!(out, "    perf_event_attr:");
        let _ = writeln!(out, "        type: {}", attr.type_);
        let _ = writeln!(out, "        config: {:#x}", attr.config);
        if attr.config1 > 0 {
            let _ = writeln!(out, "        config1: {:#x}", attr.config1);
        }
        if attr.config2 > 0 {
            let _ = writeln!(out, "        config2: {:#x}", attr.config2);
        }
        if attr.sample_type > 0 {
            let _ = writeln!(out, "        sample_type: {}", sample_type_names(attr.sample_type));
        }
        if attr.sample_period_or_freq > 0 {
            let field = if attr.freq() { "sample_freq" } else { "sample_period" };
            let _ = writeln!(out, "        {field}: {}", attr.sample_period_or_freq);
        }
        if attr.precise_ip() > 0 {
            let _ = writeln!(out, "        precise_ip: {}", attr.precise_ip());
        }
        if attr.read_format > 0 {
            let _ = writeln!(out, "        read_format: {}", read_format_names(attr.read_format));
        }
        if attr.branch_sample_type > 0 {
            let _ = writeln!(out, "        branch_sample_type: {:#x}", attr.branch_sample_type);
        }
        if attr.sample_max_stack > 0 {
            let _ = writeln!(out, "        sample_max_stack: {}", attr.sample_max_stack);
        }
        if attr.sample_regs_user > 0 {
            let _ = writeln!(out, "        sample_regs_user: {:#x}", attr.sample_regs_user);
        }
        if attr.sample_stack_user > 0 {
            let _ = writeln!(out, "        sample_stack_user: {}", attr.sample_stack_user);
        }
        if attr.sample_regs_intr > 0 {
            let _ = writeln!(out, "        sample_regs_intr: {:#x}", attr.sample_regs_intr);
        }
        for (set, name) in [
            (attr.disabled(), "disabled"),
            (attr.inherit(), "inherit"),
            (attr.exclude_user(), "exclude_user"),
            (attr.exclude_kernel(), "exclude_kernel"),
            (attr.exclude_hv(), "exclude_hv"),
            (attr.exclude_idle(), "exclude_idle"),
            (attr.exclude_guest(), "exclude_guest"),
            (attr.sample_id_all(), "sample_id_all"),
            (attr.context_switch(), "context_switch"),
            (attr.cgroup(), "cgroup"),
        ] {
            if set {
                let _ = writeln!(out, "        {name}: 1");
            }
        }

        out
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.close();
    }
}

fn append_mask_names(out: &mut String, mask: u64, names: &[(u64, &str)]) {
    for (bit, name) in names {
        if mask & bit > 0 {
            if !out.is_empty() {
                out.push_str(" | ");
            }
            out.push_str(name);
        }
    }
}

fn sample_type_names(mask: u64) -> String {
    let mut out = String::new();
    append_mask_names(
        &mut out,
        mask,
        &[
            (b::PERF_SAMPLE_IP, "IP"),
            (b::PERF_SAMPLE_TID, "TID"),
            (b::PERF_SAMPLE_TIME, "TIME"),
            (b::PERF_SAMPLE_ADDR, "ADDR"),
            (b::PERF_SAMPLE_READ, "READ"),
            (b::PERF_SAMPLE_CALLCHAIN, "CALLCHAIN"),
            (b::PERF_SAMPLE_CPU, "CPU"),
            (b::PERF_SAMPLE_PERIOD, "PERIOD"),
            (b::PERF_SAMPLE_STREAM_ID, "STREAM_ID"),
            (b::PERF_SAMPLE_RAW, "RAW"),
            (b::PERF_SAMPLE_BRANCH_STACK, "BRANCH_STACK"),
            (b::PERF_SAMPLE_REGS_USER, "REGS_USER"),
            (b::PERF_SAMPLE_STACK_USER, "STACK_USER"),
            (b::PERF_SAMPLE_WEIGHT, "WEIGHT"),
            (b::PERF_SAMPLE_DATA_SRC, "DATA_SRC"),
            (b::PERF_SAMPLE_IDENTIFIER, "IDENTIFIER"),
            (b::PERF_SAMPLE_TRANSACTION, "TRANSACTION"),
            (b::PERF_SAMPLE_REGS_INTR, "REGS_INTR"),
            (b::PERF_SAMPLE_PHYS_ADDR, "PHYS_ADDR"),
            (b::PERF_SAMPLE_CGROUP, "CGROUP"),
            (b::PERF_SAMPLE_DATA_PAGE_SIZE, "DATA_PAGE_SIZE"),
            (b::PERF_SAMPLE_CODE_PAGE_SIZE, "CODE_PAGE_SIZE"),
            (b::PERF_SAMPLE_WEIGHT_STRUCT, "WEIGHT_STRUCT"),
        ],
    );
    out
}

fn read_format_names(mask: u64) -> String {
    let mut out = String::new();
    append_mask_names(
        &mut out,
        mask,
        &[
            (b::PERF_FORMAT_TOTAL_TIME_ENABLED, "TOTAL_TIME_ENABLED"),
            (b::PERF_FORMAT_TOTAL_TIME_RUNNING, "TOTAL_TIME_RUNNING"),
            (b::PERF_FORMAT_ID, "ID"),
            (b::PERF_FORMAT_GROUP, "GROUP"),
        ],
    );
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::CounterDefinition;

    /// Opening counters needs `perf_event_paranoid` clearance and a PMU;
    /// skip the syscall-backed tests where the environment grants neither.
    pub(crate) fn perf_unavailable() -> bool {
        let definitions = CounterDefinition::new();
        let (_, config) = definitions.counter("instructions").unwrap();
        let mut counter = Counter::new(config);
        counter.open(&Config::default(), Role::Leader, -1, true, None).is_err()
    }

    #[test]
    fn close_is_idempotent() {
        if perf_unavailable() {
            return;
        }

        let definitions = CounterDefinition::new();
        let (_, config) = definitions.counter("instructions").unwrap();
        let mut counter = Counter::new(config);
        counter.open(&Config::default(), Role::Leader, -1, true, None).unwrap();

        let fd = counter.file_descriptor();
        assert!(fd > -1);
        assert!(counter.id() > 0);

        counter.close();
        assert_eq!(counter.file_descriptor(), -1);
        counter.close();
        assert_eq!(counter.file_descriptor(), -1);

        // The descriptor is no longer live in the kernel.
        let invalid = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(invalid, -1);
    }

    #[test]
    fn precision_is_negotiated_downwards_only() {
        use crate::sample::SampleValues;

        let definitions = CounterDefinition::new();
        let (_, mut config) = definitions.counter("cycles").unwrap();
        config.precise_ip(Precision::MustHaveZeroSkid as u8);
        config.period(100_000);

        let mut values = SampleValues::new();
        values.instruction_pointer(true).time(true);

        let mut counter = Counter::new(config);
        if counter
            .open(&Config::default(), Role::Leader, -1, false, Some(&values))
            .is_err()
        {
            return;
        }

        // The fallback may have lowered the precision, never raised it.
        assert!(counter.effective_precision() <= Precision::MustHaveZeroSkid);
        counter.close();
    }

    #[test]
    fn leader_attr_shape() {
        let definitions = CounterDefinition::new();
        let (_, config) = definitions.counter("cycles").unwrap();
        let mut counter = Counter::new(config);
        // Whether or not the open succeeds, the assembled attribute sticks.
        let _ = counter.open(&Config::default(), Role::Leader, -1, true, None);

        assert!(counter.attr.disabled());
        assert_eq!(
            counter.attr.read_format,
            b::PERF_FORMAT_GROUP
                | b::PERF_FORMAT_ID
                | b::PERF_FORMAT_TOTAL_TIME_ENABLED
                | b::PERF_FORMAT_TOTAL_TIME_RUNNING
        );
        assert!(!counter.attr.sample_id_all());
    }

    #[test]
    fn member_attr_shape() {
        let definitions = CounterDefinition::new();
        let (_, config) = definitions.counter("cycles").unwrap();
        let mut counter = Counter::new(config);
        let _ = counter.open(&Config::default(), Role::Member, -1, true, None);

        assert!(!counter.attr.disabled());
        assert_eq!(counter.attr.read_format, b::PERF_FORMAT_GROUP | b::PERF_FORMAT_ID);
    }
}
