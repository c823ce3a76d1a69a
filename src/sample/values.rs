//! Declarative configuration of which fields each sample record carries.

use bitflags::bitflags;

use crate::ffi::bindings as b;

bitflags! {
    /// The `PERF_SAMPLE_*` bits requested for every sample record. The same
    /// mask later drives the decoder, which reads fields in the kernel's
    /// canonical order.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct SampleMask: u64 {
        const IP = b::PERF_SAMPLE_IP;
        const TID = b::PERF_SAMPLE_TID;
        const TIME = b::PERF_SAMPLE_TIME;
        const ADDR = b::PERF_SAMPLE_ADDR;
        const READ = b::PERF_SAMPLE_READ;
        const CALLCHAIN = b::PERF_SAMPLE_CALLCHAIN;
        const CPU = b::PERF_SAMPLE_CPU;
        const PERIOD = b::PERF_SAMPLE_PERIOD;
        const STREAM_ID = b::PERF_SAMPLE_STREAM_ID;
        const RAW = b::PERF_SAMPLE_RAW;
        const BRANCH_STACK = b::PERF_SAMPLE_BRANCH_STACK;
        const REGS_USER = b::PERF_SAMPLE_REGS_USER;
        const STACK_USER = b::PERF_SAMPLE_STACK_USER;
        const WEIGHT = b::PERF_SAMPLE_WEIGHT;
        const DATA_SRC = b::PERF_SAMPLE_DATA_SRC;
        const IDENTIFIER = b::PERF_SAMPLE_IDENTIFIER;
        const TRANSACTION = b::PERF_SAMPLE_TRANSACTION;
        const REGS_INTR = b::PERF_SAMPLE_REGS_INTR;
        #[cfg(feature = "linux-4.13")]
        const PHYS_ADDR = b::PERF_SAMPLE_PHYS_ADDR;
        #[cfg(feature = "linux-5.7")]
        const CGROUP = b::PERF_SAMPLE_CGROUP;
        #[cfg(feature = "linux-5.11")]
        const DATA_PAGE_SIZE = b::PERF_SAMPLE_DATA_PAGE_SIZE;
        #[cfg(feature = "linux-5.11")]
        const CODE_PAGE_SIZE = b::PERF_SAMPLE_CODE_PAGE_SIZE;
        #[cfg(feature = "linux-5.12")]
        const WEIGHT_STRUCT = b::PERF_SAMPLE_WEIGHT_STRUCT;
    }
}

bitflags! {
    /// Which branch types the kernel records into the branch stack.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BranchMask: u64 {
        /// Branches in user space.
        const USER = b::PERF_SAMPLE_BRANCH_USER;
        /// Branches in kernel space.
        const KERNEL = b::PERF_SAMPLE_BRANCH_KERNEL;
        /// Branches in the hypervisor.
        const HV = b::PERF_SAMPLE_BRANCH_HV;
        /// Any branch type.
        const ANY = b::PERF_SAMPLE_BRANCH_ANY;
        /// Any call branch.
        const ANY_CALL = b::PERF_SAMPLE_BRANCH_ANY_CALL;
        /// Any return branch.
        const ANY_RETURN = b::PERF_SAMPLE_BRANCH_ANY_RETURN;
        /// Indirect calls.
        const IND_CALL = b::PERF_SAMPLE_BRANCH_IND_CALL;
        /// Transaction aborts.
        const ABORT_TX = b::PERF_SAMPLE_BRANCH_ABORT_TX;
        /// Branches inside a transaction.
        const IN_TX = b::PERF_SAMPLE_BRANCH_IN_TX;
        /// Branches outside a transaction.
        const NO_TX = b::PERF_SAMPLE_BRANCH_NO_TX;
        /// Conditional branches.
        const COND = b::PERF_SAMPLE_BRANCH_COND;
        /// Use the hardware call stack.
        const CALL_STACK = b::PERF_SAMPLE_BRANCH_CALL_STACK;
        /// Indirect jumps.
        #[cfg(feature = "linux-4.2")]
        const IND_JUMP = b::PERF_SAMPLE_BRANCH_IND_JUMP;
        /// Direct calls.
        #[cfg(feature = "linux-4.4")]
        const CALL = b::PERF_SAMPLE_BRANCH_CALL;
    }
}

/// A sampled CPU register, named after the x86_64 layout of
/// `perf_regs.h`. The discriminant is the kernel's register index; the
/// request mask is `1 << index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Register {
    Ax = 0,
    Bx = 1,
    Cx = 2,
    Dx = 3,
    Si = 4,
    Di = 5,
    Bp = 6,
    Sp = 7,
    Ip = 8,
    Flags = 9,
    Cs = 10,
    Ss = 11,
    Ds = 12,
    Es = 13,
    Fs = 14,
    Gs = 15,
    R8 = 16,
    R9 = 17,
    R10 = 18,
    R11 = 19,
    R12 = 20,
    R13 = 21,
    R14 = 22,
    R15 = 23,
}

/// An ordered register set; the kernel writes the sampled values in
/// ascending register-index order.
#[derive(Clone, Debug, Default)]
pub struct Registers {
    registers: Vec<Register>,
}

impl Registers {
    pub fn new(registers: Vec<Register>) -> Self {
        Self { registers }
    }

    pub fn mask(&self) -> u64 {
        self.registers
            .iter()
            .fold(0, |mask, register| mask | (1 << (*register as u64)))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl From<Vec<Register>> for Registers {
    fn from(registers: Vec<Register>) -> Self {
        Self::new(registers)
    }
}

/// Selects the fields recorded into every sample and the ancillary record
/// kinds the decoder surfaces.
///
/// ```
/// use perf_event_groups::sample::SampleValues;
///
/// let mut values = SampleValues::default();
/// values.time(true).logical_memory_address(true).data_src(true);
/// ```
#[derive(Clone, Debug, Default)]
pub struct SampleValues {
    pub(crate) mask: SampleMask,
    branch_mask: BranchMask,
    user_registers: Registers,
    kernel_registers: Registers,
    user_stack_bytes: Option<u32>,
    max_call_stack: Option<u16>,
    include_context_switch: bool,
    include_throttle: bool,
    counters: Vec<String>,
}

macro_rules! value_flag {
    ($(#[$doc:meta])* $name:ident, $flag:ident) => {
        $(#[$doc])*
        pub fn $name(&mut self, enabled: bool) -> &mut Self {
            self.mask.set(SampleMask::$flag, enabled);
            self
        }
    };
}

impl SampleValues {
    pub fn new() -> Self {
        Self::default()
    }

    value_flag!(
        /// Record the sample id shared by all records of the group.
        sample_id, IDENTIFIER
    );
    value_flag!(
        /// Record the instruction pointer.
        instruction_pointer, IP
    );
    value_flag!(
        /// Record process and thread id.
        thread_id, TID
    );
    value_flag!(
        /// Record a timestamp. Required for time-sorted results.
        time, TIME
    );
    value_flag!(
        /// Record the sampled (virtual) memory address.
        logical_memory_address, ADDR
    );
    value_flag!(
        /// Record the kernel-assigned stream id of the sampling event.
        stream_id, STREAM_ID
    );
    value_flag!(
        /// Record the CPU the sample was taken on.
        cpu_id, CPU
    );
    value_flag!(
        /// Record the active sampling period.
        period, PERIOD
    );
    value_flag!(
        /// Record the raw, ABI-opaque payload of the event.
        raw, RAW
    );
    value_flag!(
        /// Record the memory hierarchy level the sampled access hit.
        data_src, DATA_SRC
    );
    value_flag!(
        /// Record transactional-memory abort information.
        transaction_abort, TRANSACTION
    );
    #[cfg(feature = "linux-4.13")]
    value_flag!(
        /// Record the physical memory address.
        physical_memory_address, PHYS_ADDR
    );
    #[cfg(feature = "linux-5.7")]
    value_flag!(
        /// Record the perf cgroup id of the sampled task. Also requests
        /// cgroup-creation records carrying id-to-path mappings.
        cgroup, CGROUP
    );
    #[cfg(feature = "linux-5.11")]
    value_flag!(
        /// Record the page size backing the data address.
        data_page_size, DATA_PAGE_SIZE
    );
    #[cfg(feature = "linux-5.11")]
    value_flag!(
        /// Record the page size backing the instruction pointer.
        code_page_size, CODE_PAGE_SIZE
    );

    /// Record a scalar hardware weight (e.g. load latency in cycles).
    /// Mutually exclusive with [`weight_struct`][Self::weight_struct].
    pub fn weight(&mut self, enabled: bool) -> &mut Self {
        self.mask.set(SampleMask::WEIGHT, enabled);
        #[cfg(feature = "linux-5.12")]
        if enabled {
            self.mask.remove(SampleMask::WEIGHT_STRUCT);
        }
        self
    }

    /// Record the structured weight triple (cache latency, instruction
    /// retirement latency). Mutually exclusive with [`weight`][Self::weight].
    #[cfg(feature = "linux-5.12")]
    pub fn weight_struct(&mut self, enabled: bool) -> &mut Self {
        self.mask.set(SampleMask::WEIGHT_STRUCT, enabled);
        if enabled {
            self.mask.remove(SampleMask::WEIGHT);
        }
        self
    }

    /// Record the call chain (stack backtrace).
    pub fn callchain(&mut self, enabled: bool) -> &mut Self {
        self.mask.set(SampleMask::CALLCHAIN, enabled);
        self
    }

    /// Record the call chain, capped at `depth` frames.
    pub fn max_call_stack(&mut self, depth: u16) -> &mut Self {
        self.mask.insert(SampleMask::CALLCHAIN);
        self.max_call_stack = Some(depth);
        self
    }

    /// Record the branch stack, filtered by the given mask.
    pub fn branch_stack(&mut self, mask: BranchMask) -> &mut Self {
        self.mask.set(SampleMask::BRANCH_STACK, !mask.is_empty());
        self.branch_mask = mask;
        self
    }

    /// Record user-level registers at sample time.
    pub fn user_registers(&mut self, registers: impl Into<Registers>) -> &mut Self {
        let registers = registers.into();
        self.mask.set(SampleMask::REGS_USER, !registers.is_empty());
        self.user_registers = registers;
        self
    }

    /// Record kernel-level registers at interrupt time.
    pub fn kernel_registers(&mut self, registers: impl Into<Registers>) -> &mut Self {
        let registers = registers.into();
        self.mask.set(SampleMask::REGS_INTR, !registers.is_empty());
        self.kernel_registers = registers;
        self
    }

    /// Dump up to `bytes` of the user stack with every sample, for stack
    /// unwinding. Zero disables the dump.
    pub fn user_stack(&mut self, bytes: u32) -> &mut Self {
        self.mask.set(SampleMask::STACK_USER, bytes > 0);
        self.user_stack_bytes = (bytes > 0).then_some(bytes);
        self
    }

    /// Read the given counters on every sample. The values arrive embedded
    /// in the record, scaled by the record's own multiplexing correction.
    pub fn counter(&mut self, names: &[&str]) -> &mut Self {
        self.mask.set(SampleMask::READ, !names.is_empty());
        self.counters = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Surface context-switch records.
    #[cfg(feature = "linux-4.3")]
    pub fn context_switch(&mut self, enabled: bool) -> &mut Self {
        self.include_context_switch = enabled;
        self
    }

    /// Surface throttle and unthrottle records.
    pub fn throttle(&mut self, enabled: bool) -> &mut Self {
        self.include_throttle = enabled;
        self
    }

    pub(crate) fn is_set(&self, mask: SampleMask) -> bool {
        self.mask.contains(mask)
    }

    pub(crate) fn sample_type_bits(&self) -> u64 {
        self.mask.bits()
    }

    pub(crate) fn branch_bits(&self) -> u64 {
        self.branch_mask.bits()
    }

    pub(crate) fn user_register_mask(&self) -> u64 {
        self.user_registers.mask()
    }

    pub(crate) fn user_register_count(&self) -> usize {
        self.user_registers.len()
    }

    pub(crate) fn kernel_register_mask(&self) -> u64 {
        self.kernel_registers.mask()
    }

    pub(crate) fn kernel_register_count(&self) -> usize {
        self.kernel_registers.len()
    }

    pub(crate) fn user_stack_bytes(&self) -> Option<u32> {
        self.user_stack_bytes
    }

    pub(crate) fn max_stack(&self) -> Option<u16> {
        self.max_call_stack
    }

    pub(crate) fn is_include_context_switch(&self) -> bool {
        self.include_context_switch
    }

    #[cfg(feature = "linux-5.7")]
    pub(crate) fn is_include_cgroup(&self) -> bool {
        self.mask.contains(SampleMask::CGROUP)
    }

    pub(crate) fn is_include_throttle(&self) -> bool {
        self.include_throttle
    }

    pub(crate) fn counter_names(&self) -> &[String] {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_toggle_the_matching_bits() {
        let mut values = SampleValues::new();
        values.time(true).instruction_pointer(true).data_src(true);
        assert!(values.is_set(SampleMask::TIME));
        assert!(values.is_set(SampleMask::IP));
        assert!(values.is_set(SampleMask::DATA_SRC));

        values.time(false);
        assert!(!values.is_set(SampleMask::TIME));
    }

    #[cfg(feature = "linux-5.12")]
    #[test]
    fn weight_variants_are_mutually_exclusive() {
        let mut values = SampleValues::new();
        values.weight(true);
        values.weight_struct(true);
        assert!(values.is_set(SampleMask::WEIGHT_STRUCT));
        assert!(!values.is_set(SampleMask::WEIGHT));

        values.weight(true);
        assert!(values.is_set(SampleMask::WEIGHT));
        assert!(!values.is_set(SampleMask::WEIGHT_STRUCT));
    }

    #[test]
    fn register_sets_build_their_kernel_mask() {
        let registers = Registers::new(vec![Register::Ax, Register::Sp, Register::R15]);
        assert_eq!(registers.mask(), (1 << 0) | (1 << 7) | (1 << 23));
        assert_eq!(registers.len(), 3);

        let mut values = SampleValues::new();
        values.user_registers(vec![Register::Ip, Register::Flags]);
        assert!(values.is_set(SampleMask::REGS_USER));
        assert_eq!(values.user_register_mask(), (1 << 8) | (1 << 9));
        assert_eq!(values.user_register_count(), 2);
    }

    #[test]
    fn read_counters_set_the_read_bit() {
        let mut values = SampleValues::new();
        values.counter(&["instructions", "cycles"]);
        assert!(values.is_set(SampleMask::READ));
        assert_eq!(values.counter_names().len(), 2);

        values.counter(&[]);
        assert!(!values.is_set(SampleMask::READ));
    }

    #[test]
    fn user_stack_size_toggles_the_dump() {
        let mut values = SampleValues::new();
        values.user_stack(32);
        assert!(values.is_set(SampleMask::STACK_USER));
        assert_eq!(values.user_stack_bytes(), Some(32));

        values.user_stack(0);
        assert!(!values.is_set(SampleMask::STACK_USER));
        assert_eq!(values.user_stack_bytes(), None);
    }

    #[test]
    fn callchain_depth_implies_callchain() {
        let mut values = SampleValues::new();
        values.max_call_stack(64);
        assert!(values.is_set(SampleMask::CALLCHAIN));
        assert_eq!(values.max_stack(), Some(64));
    }
}
