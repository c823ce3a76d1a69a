//! Decoded ring-buffer records.
//!
//! A [`Sample`] is a record of many optionals: each decoder reads exactly
//! the fields whose bits were set in the recorded
//! [`SampleValues`][super::SampleValues] mask, in the kernel's canonical
//! field order, and leaves everything else unset.

use super::values::{SampleMask, SampleValues};
use crate::count::CounterResult;
use crate::ffi::bindings as b;
use crate::ffi::deref_offset;

/// Execution mode the record was taken in, from the `misc` bits of the
/// record header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    #[default]
    Unknown,
    User,
    Kernel,
    Hypervisor,
    GuestUser,
    GuestKernel,
}

impl Mode {
    fn from_misc(misc: u16) -> Self {
        match misc & b::PERF_RECORD_MISC_CPUMODE_MASK {
            b::PERF_RECORD_MISC_KERNEL => Mode::Kernel,
            b::PERF_RECORD_MISC_USER => Mode::User,
            b::PERF_RECORD_MISC_HYPERVISOR => Mode::Hypervisor,
            b::PERF_RECORD_MISC_GUEST_KERNEL => Mode::GuestKernel,
            b::PERF_RECORD_MISC_GUEST_USER => Mode::GuestUser,
            _ => Mode::Unknown,
        }
    }
}

/// One entry of the sampled branch stack.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Branch {
    pub instruction_pointer_from: u64,
    pub instruction_pointer_to: u64,
    pub is_mispredicted: bool,
    pub is_predicted: bool,
    pub is_in_transaction: bool,
    pub is_transaction_abort: bool,
    pub cycles: u16,
}

/// Hardware-provided cost of the sampled event, either the plain scalar
/// (`PERF_SAMPLE_WEIGHT`) or the structured triple
/// (`PERF_SAMPLE_WEIGHT_STRUCT`).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Weight {
    Full(u64),
    Vars {
        cache_latency: u32,
        instruction_retirement_latency: u16,
        var3: u16,
    },
}

impl Weight {
    /// The cache-to-use latency; for the scalar variant the scalar itself.
    pub fn cache_latency(&self) -> u64 {
        match self {
            Weight::Full(weight) => *weight,
            Weight::Vars { cache_latency, .. } => u64::from(*cache_latency),
        }
    }

    /// Retirement latency of the sampled instruction; only the structured
    /// variant carries it.
    pub fn instruction_retirement_latency(&self) -> Option<u64> {
        match self {
            Weight::Full(_) => None,
            Weight::Vars {
                instruction_retirement_latency,
                ..
            } => Some(u64::from(*instruction_retirement_latency)),
        }
    }
}

/// Where in the memory hierarchy the data of a sampled access came from,
/// as a set of predicates over the raw `perf_mem_data_src` word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataSource(u64);

impl DataSource {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    fn op(&self) -> u64 {
        self.0
    }

    fn lvl(&self) -> u64 {
        self.0 >> b::PERF_MEM_LVL_SHIFT
    }

    fn snoop(&self) -> u64 {
        self.0 >> b::PERF_MEM_SNOOP_SHIFT
    }

    fn lock(&self) -> u64 {
        self.0 >> b::PERF_MEM_LOCK_SHIFT
    }

    fn tlb(&self) -> u64 {
        self.0 >> b::PERF_MEM_TLB_SHIFT
    }

    /// No data source information is available.
    pub fn is_na(&self) -> bool {
        self.op() & b::PERF_MEM_OP_NA > 0
    }

    pub fn is_load(&self) -> bool {
        self.op() & b::PERF_MEM_OP_LOAD > 0
    }

    pub fn is_store(&self) -> bool {
        self.op() & b::PERF_MEM_OP_STORE > 0
    }

    pub fn is_prefetch(&self) -> bool {
        self.op() & b::PERF_MEM_OP_PFETCH > 0
    }

    pub fn is_exec(&self) -> bool {
        self.op() & b::PERF_MEM_OP_EXEC > 0
    }

    pub fn is_mem_hit(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_HIT > 0
    }

    pub fn is_mem_miss(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_MISS > 0
    }

    pub fn is_mem_l1(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_L1 > 0
    }

    /// Line fill buffer (also called miss address buffer).
    pub fn is_mem_lfb(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_LFB > 0
    }

    pub fn is_mem_l2(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_L2 > 0
    }

    pub fn is_mem_l3(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_L3 > 0
    }

    pub fn is_mem_local_ram(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_LOC_RAM > 0
    }

    /// Remote DRAM, one or two hops.
    pub fn is_mem_remote_ram(&self) -> bool {
        self.lvl() & (b::PERF_MEM_LVL_REM_RAM1 | b::PERF_MEM_LVL_REM_RAM2) > 0
    }

    /// Remote cache, one or two hops.
    pub fn is_mem_remote_cache(&self) -> bool {
        self.lvl() & (b::PERF_MEM_LVL_REM_CCE1 | b::PERF_MEM_LVL_REM_CCE2) > 0
    }

    pub fn is_mem_io(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_IO > 0
    }

    pub fn is_mem_uncached(&self) -> bool {
        self.lvl() & b::PERF_MEM_LVL_UNC > 0
    }

    pub fn is_snoop_hit(&self) -> bool {
        self.snoop() & b::PERF_MEM_SNOOP_HIT > 0
    }

    pub fn is_snoop_miss(&self) -> bool {
        self.snoop() & b::PERF_MEM_SNOOP_MISS > 0
    }

    pub fn is_snoop_hit_modified(&self) -> bool {
        self.snoop() & b::PERF_MEM_SNOOP_HITM > 0
    }

    pub fn is_locked_transaction(&self) -> bool {
        self.lock() & b::PERF_MEM_LOCK_LOCKED > 0
    }

    pub fn is_tlb_hit(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_HIT > 0
    }

    pub fn is_tlb_miss(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_MISS > 0
    }

    pub fn is_tlb_l1(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_L1 > 0
    }

    pub fn is_tlb_l2(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_L2 > 0
    }

    pub fn is_tlb_hardware_walker(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_WK > 0
    }

    pub fn is_tlb_fault_handler(&self) -> bool {
        self.tlb() & b::PERF_MEM_TLB_OS > 0
    }
}

/// Sources of a transactional-memory abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionAbort(u64);

impl TransactionAbort {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_elision(&self) -> bool {
        self.0 & b::PERF_TXN_ELISION > 0
    }

    pub fn is_transaction(&self) -> bool {
        self.0 & b::PERF_TXN_TRANSACTION > 0
    }

    /// Abort caused by the current thread.
    pub fn is_synchronous(&self) -> bool {
        self.0 & b::PERF_TXN_SYNC > 0
    }

    /// Abort caused by another thread.
    pub fn is_asynchronous(&self) -> bool {
        self.0 & b::PERF_TXN_ASYNC > 0
    }

    pub fn is_retryable(&self) -> bool {
        self.0 & b::PERF_TXN_RETRY > 0
    }

    pub fn is_conflict(&self) -> bool {
        self.0 & b::PERF_TXN_CONFLICT > 0
    }

    pub fn is_capacity_read(&self) -> bool {
        self.0 & b::PERF_TXN_CAPACITY_READ > 0
    }

    pub fn is_capacity_write(&self) -> bool {
        self.0 & b::PERF_TXN_CAPACITY_WRITE > 0
    }

    /// User-specified abort code.
    pub fn code(&self) -> u32 {
        ((self.0 & b::PERF_TXN_ABORT_MASK) >> b::PERF_TXN_ABORT_SHIFT) as u32
    }
}

/// A context switch in or out of the observed task.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextSwitch {
    pub is_out: bool,
    /// The task was preempted while runnable.
    pub is_out_preempt: bool,
    /// Incoming/outgoing task; only CPU-wide records carry it.
    pub process_id: Option<u32>,
    pub thread_id: Option<u32>,
}

/// A cgroup id together with its path, from a cgroup-creation record.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CGroup {
    pub id: u64,
    pub path: String,
}

/// The sampling event was throttled or unthrottled by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Throttle {
    pub is_throttle: bool,
}

/// One decoded record.
///
/// Every field is optional: it is present only if the matching bit was
/// recorded (for sample fields) or if the record was of the matching
/// auxiliary kind (loss, context switch, cgroup, throttle).
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Execution mode derived from the record header.
    pub mode: Mode,
    /// The instruction pointer points at the exact triggering instruction
    /// (zero skid).
    pub is_exact_ip: bool,

    pub sample_id: Option<u64>,
    pub instruction_pointer: Option<u64>,
    pub process_id: Option<u32>,
    pub thread_id: Option<u32>,
    pub time: Option<u64>,
    pub stream_id: Option<u64>,
    pub logical_memory_address: Option<u64>,
    pub cpu_id: Option<u32>,
    pub period: Option<u64>,
    /// Embedded counter values, scaled by the record's own multiplexing
    /// correction.
    pub counter_result: Option<CounterResult>,
    pub callchain: Option<Vec<u64>>,
    pub raw: Option<Vec<u8>>,
    pub branches: Option<Vec<Branch>>,
    pub user_registers_abi: Option<u64>,
    pub user_registers: Option<Vec<u64>>,
    /// Snapshot of the user stack, truncated to the dynamically used part.
    pub user_stack: Option<Vec<u8>>,
    pub kernel_registers_abi: Option<u64>,
    pub kernel_registers: Option<Vec<u64>>,
    pub weight: Option<Weight>,
    pub data_src: Option<DataSource>,
    pub transaction_abort: Option<TransactionAbort>,
    pub physical_memory_address: Option<u64>,
    pub cgroup_id: Option<u64>,
    pub data_page_size: Option<u64>,
    pub code_page_size: Option<u64>,

    /// Number of records the kernel dropped for lack of buffer space.
    pub count_loss: Option<u64>,
    pub context_switch: Option<ContextSwitch>,
    pub cgroup: Option<CGroup>,
    pub throttle: Option<Throttle>,
}

impl Sample {
    fn with_mode(misc: u16) -> Self {
        Sample {
            mode: Mode::from_misc(misc),
            ..Sample::default()
        }
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L957
    // struct {
    //     struct perf_event_header header;
    //     { u64 id;        } && PERF_SAMPLE_IDENTIFIER
    //     { u64 ip;        } && PERF_SAMPLE_IP
    //     { u32 pid, tid;  } && PERF_SAMPLE_TID
    //     { u64 time;      } && PERF_SAMPLE_TIME
    //     { u64 addr;      } && PERF_SAMPLE_ADDR
    //     { u64 stream_id; } && PERF_SAMPLE_STREAM_ID
    //     { u32 cpu, res;  } && PERF_SAMPLE_CPU
    //     { u64 period;    } && PERF_SAMPLE_PERIOD
    //     { struct read_format values; } && PERF_SAMPLE_READ
    //     { u64 nr; u64 ips[nr]; } && PERF_SAMPLE_CALLCHAIN
    //     { u32 size; char data[size]; } && PERF_SAMPLE_RAW
    //     { u64 nr; { u64 from, to, flags; } lbr[nr]; } && PERF_SAMPLE_BRANCH_STACK
    //     { u64 abi; u64 regs[weight(mask)]; } && PERF_SAMPLE_REGS_USER
    //     { u64 size; char data[size]; u64 dyn_size; } && PERF_SAMPLE_STACK_USER
    //     { u64 weight; } && PERF_SAMPLE_WEIGHT
    //     { union perf_sample_weight; } && PERF_SAMPLE_WEIGHT_STRUCT
    //     { u64 data_src; } && PERF_SAMPLE_DATA_SRC
    //     { u64 transaction; } && PERF_SAMPLE_TRANSACTION
    //     { u64 abi; u64 regs[weight(mask)]; } && PERF_SAMPLE_REGS_INTR
    //     { u64 phys_addr; } && PERF_SAMPLE_PHYS_ADDR
    //     { u64 cgroup; } && PERF_SAMPLE_CGROUP
    //     { u64 data_page_size; } && PERF_SAMPLE_DATA_PAGE_SIZE
    //     { u64 code_page_size; } && PERF_SAMPLE_CODE_PAGE_SIZE
    // };
    pub(crate) unsafe fn from_sample_record(
        mut ptr: *const u8,
        misc: u16,
        values: &SampleValues,
        counter_names: &[String],
    ) -> Self {
        let mut sample = Sample::with_mode(misc);
        sample.is_exact_ip = misc & b::PERF_RECORD_MISC_EXACT_IP > 0;

        macro_rules! when {
            ($flag:ident, $ty:ty) => {
                values
                    .is_set(SampleMask::$flag)
                    .then(|| deref_offset::<$ty>(&mut ptr))
            };
            ($flag:ident, $then:expr) => {
                values.is_set(SampleMask::$flag).then(|| $then)
            };
        }

        sample.sample_id = when!(IDENTIFIER, u64);
        sample.instruction_pointer = when!(IP, u64);
        if values.is_set(SampleMask::TID) {
            sample.process_id = Some(deref_offset(&mut ptr));
            sample.thread_id = Some(deref_offset(&mut ptr));
        }
        sample.time = when!(TIME, u64);
        sample.logical_memory_address = when!(ADDR, u64);
        sample.stream_id = when!(STREAM_ID, u64);
        if values.is_set(SampleMask::CPU) {
            sample.cpu_id = Some(deref_offset(&mut ptr));
            // Skip "res".
            ptr = ptr.add(std::mem::size_of::<u32>());
        }
        sample.period = when!(PERIOD, u64);
        sample.counter_result =
            when!(READ, { read_counter_values(&mut ptr, counter_names) }).flatten();
        sample.callchain = when!(CALLCHAIN, {
            let len = deref_offset::<u64>(&mut ptr) as usize;
            let mut ips = Vec::with_capacity(len);
            for _ in 0..len {
                ips.push(deref_offset::<u64>(&mut ptr));
            }
            ips
        });
        sample.raw = when!(RAW, {
            // The kernel pads the payload so that size + the u32 length
            // keep the following fields 8-byte aligned.
            let len = deref_offset::<u32>(&mut ptr) as usize;
            let bytes = std::slice::from_raw_parts(ptr, len).to_vec();
            ptr = ptr.add(len);
            bytes
        });
        sample.branches = when!(BRANCH_STACK, {
            let len = deref_offset::<u64>(&mut ptr) as usize;
            let mut branches = Vec::with_capacity(len);
            for _ in 0..len {
                let from = deref_offset::<u64>(&mut ptr);
                let to = deref_offset::<u64>(&mut ptr);
                let flags = deref_offset::<u64>(&mut ptr);
                // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L1439
                branches.push(Branch {
                    instruction_pointer_from: from,
                    instruction_pointer_to: to,
                    is_mispredicted: flags & 0b1 > 0,
                    is_predicted: flags & 0b10 > 0,
                    is_in_transaction: flags & 0b100 > 0,
                    is_transaction_abort: flags & 0b1000 > 0,
                    cycles: ((flags >> 4) & 0xffff) as u16,
                });
            }
            branches
        });
        if values.is_set(SampleMask::REGS_USER) {
            let (abi, registers) = read_registers(&mut ptr, values.user_register_count());
            sample.user_registers_abi = Some(abi);
            sample.user_registers = registers;
        }
        sample.user_stack = when!(STACK_USER, {
            let len = deref_offset::<u64>(&mut ptr) as usize;
            let bytes = std::slice::from_raw_parts(ptr, len);
            ptr = ptr.add(len);
            // The trailing dyn_size tells how much of the fixed-size dump
            // the stack actually occupied; it is absent for an empty dump.
            let dyn_len = if len > 0 {
                (deref_offset::<u64>(&mut ptr) as usize).min(len)
            } else {
                0
            };
            bytes[..dyn_len].to_vec()
        });
        #[cfg(feature = "linux-5.12")]
        {
            sample.weight = if values.is_set(SampleMask::WEIGHT) {
                Some(Weight::Full(deref_offset(&mut ptr)))
            } else if values.is_set(SampleMask::WEIGHT_STRUCT) {
                // Little-endian layout of union perf_sample_weight.
                Some(Weight::Vars {
                    cache_latency: deref_offset(&mut ptr),
                    instruction_retirement_latency: deref_offset(&mut ptr),
                    var3: deref_offset(&mut ptr),
                })
            } else {
                None
            };
        }
        #[cfg(not(feature = "linux-5.12"))]
        {
            sample.weight = when!(WEIGHT, { Weight::Full(deref_offset(&mut ptr)) });
        }
        sample.data_src = when!(DATA_SRC, { DataSource::new(deref_offset(&mut ptr)) });
        sample.transaction_abort =
            when!(TRANSACTION, { TransactionAbort::new(deref_offset(&mut ptr)) });
        if values.is_set(SampleMask::REGS_INTR) {
            let (abi, registers) = read_registers(&mut ptr, values.kernel_register_count());
            sample.kernel_registers_abi = Some(abi);
            sample.kernel_registers = registers;
        }
        #[cfg(feature = "linux-4.13")]
        {
            sample.physical_memory_address = when!(PHYS_ADDR, u64);
        }
        #[cfg(feature = "linux-5.7")]
        {
            sample.cgroup_id = when!(CGROUP, u64);
        }
        #[cfg(feature = "linux-5.11")]
        {
            sample.data_page_size = when!(DATA_PAGE_SIZE, u64);
            sample.code_page_size = when!(CODE_PAGE_SIZE, u64);
        }

        sample
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L891
    // struct {
    //     struct perf_event_header header;
    //     u64 id;
    //     u64 lost;
    //     struct sample_id sample_id;
    // };
    pub(crate) unsafe fn from_loss_record(mut ptr: *const u8, misc: u16, values: &SampleValues) -> Self {
        let mut sample = Sample::with_mode(misc);

        sample.sample_id = Some(deref_offset(&mut ptr));
        sample.count_loss = Some(deref_offset(&mut ptr));
        read_sample_id(&mut ptr, values, &mut sample);

        sample
    }

    // PERF_RECORD_SWITCH carries only the trailer; the CPU-wide variant is
    // prefixed with the incoming/outgoing task.
    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L1119
    pub(crate) unsafe fn from_context_switch_record(
        mut ptr: *const u8,
        misc: u16,
        values: &SampleValues,
        cpu_wide: bool,
    ) -> Self {
        let mut sample = Sample::with_mode(misc);

        let mut process_id = None;
        let mut thread_id = None;
        if cpu_wide {
            process_id = Some(deref_offset(&mut ptr));
            thread_id = Some(deref_offset(&mut ptr));
        }

        let is_out = misc & b::PERF_RECORD_MISC_SWITCH_OUT > 0;
        #[cfg(feature = "linux-4.17")]
        let is_out_preempt = is_out && misc & b::PERF_RECORD_MISC_SWITCH_OUT_PREEMPT > 0;
        #[cfg(not(feature = "linux-4.17"))]
        let is_out_preempt = false;

        read_sample_id(&mut ptr, values, &mut sample);

        sample.context_switch = Some(ContextSwitch {
            is_out,
            is_out_preempt,
            process_id,
            thread_id,
        });

        sample
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L1187
    // struct {
    //     struct perf_event_header header;
    //     u64 id;
    //     char path[];
    //     struct sample_id sample_id;
    // };
    pub(crate) unsafe fn from_cgroup_record(mut ptr: *const u8, misc: u16) -> Self {
        let mut sample = Sample::with_mode(misc);

        let id = deref_offset(&mut ptr);
        let path = std::ffi::CStr::from_ptr(ptr as _)
            .to_string_lossy()
            .into_owned();
        sample.cgroup = Some(CGroup { id, path });

        sample
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L923
    // struct {
    //     struct perf_event_header header;
    //     u64 time;
    //     u64 id;
    //     u64 stream_id;
    //     struct sample_id sample_id;
    // };
    pub(crate) unsafe fn from_throttle_record(
        mut ptr: *const u8,
        misc: u16,
        values: &SampleValues,
        is_throttle: bool,
    ) -> Self {
        let mut sample = Sample::with_mode(misc);

        sample.time = Some(deref_offset(&mut ptr));
        sample.sample_id = Some(deref_offset(&mut ptr));
        sample.stream_id = Some(deref_offset(&mut ptr));
        read_sample_id(&mut ptr, values, &mut sample);

        sample.throttle = Some(Throttle { is_throttle });

        sample
    }
}

// The embedded read_format block: {nr, time_enabled, time_running,
// nr x {value, id}}. Values are scaled by the record's own correction; a
// member count that does not match the opened group drops the block but
// keeps the sample.
unsafe fn read_counter_values(
    ptr: &mut *const u8,
    counter_names: &[String],
) -> Option<CounterResult> {
    let count_members = deref_offset::<u64>(ptr) as usize;
    let time_enabled: u64 = deref_offset(ptr);
    let time_running: u64 = deref_offset(ptr);
    let correction = if time_running > 0 {
        time_enabled as f64 / time_running as f64
    } else {
        0.0
    };

    let mut counter_values = Vec::with_capacity(count_members);
    for _ in 0..count_members {
        let value: u64 = deref_offset(ptr);
        let _id: u64 = deref_offset(ptr);
        counter_values.push(value as f64 * correction);
    }

    (count_members == counter_names.len()).then(|| {
        CounterResult::new(
            counter_names
                .iter()
                .cloned()
                .zip(counter_values)
                .collect(),
        )
    })
}

unsafe fn read_registers(ptr: &mut *const u8, count: usize) -> (u64, Option<Vec<u64>>) {
    let abi: u64 = deref_offset(ptr);
    // With ABI_NONE the kernel writes no register values at all.
    // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L7589
    if abi == b::PERF_SAMPLE_REGS_ABI_NONE || count == 0 {
        return (abi, None);
    }

    let mut registers = Vec::with_capacity(count);
    for _ in 0..count {
        registers.push(deref_offset::<u64>(ptr));
    }
    (abi, Some(registers))
}

// The sample_id trailer every non-sample record ends with when
// `sample_id_all` is set, gated by the same mask as the sample fields.
// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L859
unsafe fn read_sample_id(ptr: &mut *const u8, values: &SampleValues, sample: &mut Sample) {
    if values.is_set(SampleMask::TID) {
        sample.process_id = Some(deref_offset(ptr));
        sample.thread_id = Some(deref_offset(ptr));
    }
    if values.is_set(SampleMask::TIME) {
        sample.time = Some(deref_offset(ptr));
    }
    if values.is_set(SampleMask::STREAM_ID) {
        sample.stream_id = Some(deref_offset(ptr));
    }
    if values.is_set(SampleMask::CPU) {
        sample.cpu_id = Some(deref_offset(ptr));
        *ptr = ptr.add(std::mem::size_of::<u32>());
    }
    if values.is_set(SampleMask::IDENTIFIER) {
        sample.sample_id = Some(deref_offset(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::bindings as b;

    #[derive(Default)]
    struct Payload(Vec<u8>);

    impl Payload {
        fn u32(mut self, value: u32) -> Self {
            self.0.extend_from_slice(&value.to_ne_bytes());
            self
        }

        fn u64(mut self, value: u64) -> Self {
            self.0.extend_from_slice(&value.to_ne_bytes());
            self
        }

        fn bytes(mut self, bytes: &[u8]) -> Self {
            self.0.extend_from_slice(bytes);
            self
        }
    }

    #[test]
    fn sample_fields_follow_the_recorded_mask() {
        let mut values = SampleValues::new();
        values
            .instruction_pointer(true)
            .thread_id(true)
            .time(true)
            .logical_memory_address(true)
            .cpu_id(true)
            .period(true);

        let payload = Payload::default()
            .u64(0xdead_beef) // ip
            .u32(1234) // pid
            .u32(5678) // tid
            .u64(1_000_000) // time
            .u64(0x7fff_0000) // addr
            .u32(3) // cpu
            .u32(0) // res
            .u64(10_000); // period

        let misc = b::PERF_RECORD_MISC_USER | b::PERF_RECORD_MISC_EXACT_IP;
        let sample = unsafe { Sample::from_sample_record(payload.0.as_ptr(), misc, &values, &[]) };

        assert_eq!(sample.mode, Mode::User);
        assert!(sample.is_exact_ip);
        assert_eq!(sample.instruction_pointer, Some(0xdead_beef));
        assert_eq!(sample.process_id, Some(1234));
        assert_eq!(sample.thread_id, Some(5678));
        assert_eq!(sample.time, Some(1_000_000));
        assert_eq!(sample.logical_memory_address, Some(0x7fff_0000));
        assert_eq!(sample.cpu_id, Some(3));
        assert_eq!(sample.period, Some(10_000));

        // Nothing else was recorded.
        assert!(sample.sample_id.is_none());
        assert!(sample.callchain.is_none());
        assert!(sample.data_src.is_none());
        assert!(sample.count_loss.is_none());
    }

    #[test]
    fn embedded_reads_are_scaled_by_their_own_correction() {
        let mut values = SampleValues::new();
        values.counter(&["instructions", "cycles"]);
        let names = vec!["instructions".to_string(), "cycles".to_string()];

        let payload = Payload::default()
            .u64(2) // nr
            .u64(2000) // time_enabled
            .u64(1000) // time_running
            .u64(100) // value 0
            .u64(11) // id 0
            .u64(200) // value 1
            .u64(12); // id 1

        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &names)
        };

        let result = sample.counter_result.unwrap();
        assert_eq!(result.get("instructions"), Some(200.0));
        assert_eq!(result.get("cycles"), Some(400.0));
    }

    #[test]
    fn read_member_mismatch_drops_the_block_but_keeps_the_sample() {
        let mut values = SampleValues::new();
        values.time(true).counter(&["instructions", "cycles"]);
        let names = vec!["instructions".to_string(), "cycles".to_string()];

        let payload = Payload::default()
            .u64(77) // time
            .u64(1) // nr, does not match the two configured names
            .u64(2000)
            .u64(1000)
            .u64(100)
            .u64(11);

        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_KERNEL, &values, &names)
        };

        assert_eq!(sample.time, Some(77));
        assert_eq!(sample.mode, Mode::Kernel);
        assert!(sample.counter_result.is_none());
    }

    #[test]
    fn callchain_and_branches_decode_their_lengths() {
        let mut values = SampleValues::new();
        values.callchain(true).branch_stack(crate::sample::BranchMask::USER);

        let payload = Payload::default()
            .u64(3) // callchain length
            .u64(0x100)
            .u64(0x200)
            .u64(0x300)
            .u64(1) // one branch entry
            .u64(0x1000) // from
            .u64(0x2000) // to
            .u64(0b10 | (7 << 4)); // predicted, 7 cycles

        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };

        assert_eq!(sample.callchain, Some(vec![0x100, 0x200, 0x300]));
        let branches = sample.branches.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].instruction_pointer_from, 0x1000);
        assert_eq!(branches[0].instruction_pointer_to, 0x2000);
        assert!(branches[0].is_predicted);
        assert!(!branches[0].is_mispredicted);
        assert_eq!(branches[0].cycles, 7);
    }

    #[test]
    fn registers_respect_the_abi_marker() {
        use crate::sample::Register;

        let mut values = SampleValues::new();
        values.user_registers(vec![Register::Ax, Register::Sp]);

        let payload = Payload::default()
            .u64(b::PERF_SAMPLE_REGS_ABI_64)
            .u64(41)
            .u64(42);
        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };
        assert_eq!(sample.user_registers_abi, Some(b::PERF_SAMPLE_REGS_ABI_64));
        assert_eq!(sample.user_registers, Some(vec![41, 42]));

        // ABI_NONE carries no register values.
        let payload = Payload::default().u64(b::PERF_SAMPLE_REGS_ABI_NONE);
        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };
        assert_eq!(sample.user_registers_abi, Some(b::PERF_SAMPLE_REGS_ABI_NONE));
        assert!(sample.user_registers.is_none());
    }

    #[test]
    fn user_stack_truncates_to_the_dynamic_size() {
        let mut values = SampleValues::new();
        values.user_stack(16).data_src(true);

        let payload = Payload::default()
            .u64(16) // dump size
            .bytes(&[0xaa; 16]) // stack bytes
            .u64(8) // dyn_size
            .u64(b::PERF_MEM_OP_LOAD); // data_src, must stay in sync
        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };

        assert_eq!(sample.user_stack, Some(vec![0xaa; 8]));
        assert!(sample.data_src.unwrap().is_load());

        // An empty dump carries no dyn_size.
        let payload = Payload::default().u64(0).u64(b::PERF_MEM_OP_LOAD);
        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };
        assert_eq!(sample.user_stack, Some(Vec::new()));
        assert!(sample.data_src.unwrap().is_load());
    }

    #[cfg(feature = "linux-5.12")]
    #[test]
    fn weight_struct_yields_the_latency_triple() {
        let mut values = SampleValues::new();
        values.weight_struct(true);

        let payload = Payload::default().u32(33).bytes(&22_u16.to_ne_bytes()).bytes(&0_u16.to_ne_bytes());
        let sample = unsafe {
            Sample::from_sample_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_USER, &values, &[])
        };

        let weight = sample.weight.unwrap();
        assert_eq!(weight.cache_latency(), 33);
        assert_eq!(weight.instruction_retirement_latency(), Some(22));
    }

    #[test]
    fn loss_records_carry_the_count_and_trailer() {
        let mut values = SampleValues::new();
        values.time(true).cpu_id(true);

        let payload = Payload::default()
            .u64(9) // id
            .u64(250) // lost
            .u64(123_456) // trailer: time
            .u32(2) // trailer: cpu
            .u32(0); // trailer: res

        let sample =
            unsafe { Sample::from_loss_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_KERNEL, &values) };

        assert_eq!(sample.count_loss, Some(250));
        assert_eq!(sample.sample_id, Some(9));
        assert_eq!(sample.time, Some(123_456));
        assert_eq!(sample.cpu_id, Some(2));
    }

    #[test]
    fn cpu_wide_context_switches_carry_the_task() {
        let values = SampleValues::new();

        let payload = Payload::default().u32(400).u32(401);
        let misc = b::PERF_RECORD_MISC_KERNEL | b::PERF_RECORD_MISC_SWITCH_OUT;
        let sample = unsafe {
            Sample::from_context_switch_record(payload.0.as_ptr(), misc, &values, true)
        };

        let info = sample.context_switch.unwrap();
        assert!(info.is_out);
        assert_eq!(info.process_id, Some(400));
        assert_eq!(info.thread_id, Some(401));

        let sample = unsafe {
            Sample::from_context_switch_record(payload.0.as_ptr(), b::PERF_RECORD_MISC_KERNEL, &values, false)
        };
        let info = sample.context_switch.unwrap();
        assert!(!info.is_out);
        assert_eq!(info.process_id, None);
    }

    #[test]
    fn cgroup_records_decode_id_and_path() {
        let payload = Payload::default().u64(71).bytes(b"/user.slice\0");
        let sample = unsafe { Sample::from_cgroup_record(payload.0.as_ptr(), 0) };

        let cgroup = sample.cgroup.unwrap();
        assert_eq!(cgroup.id, 71);
        assert_eq!(cgroup.path, "/user.slice");
    }

    #[test]
    fn throttle_records_decode_time_and_ids() {
        let values = SampleValues::new();
        let payload = Payload::default().u64(555).u64(6).u64(7);
        let sample =
            unsafe { Sample::from_throttle_record(payload.0.as_ptr(), 0, &values, true) };

        assert_eq!(sample.time, Some(555));
        assert_eq!(sample.sample_id, Some(6));
        assert_eq!(sample.stream_id, Some(7));
        assert_eq!(sample.throttle, Some(Throttle { is_throttle: true }));
    }

    #[test]
    fn data_source_predicates_round_trip() {
        let raw = b::PERF_MEM_OP_LOAD
            | ((b::PERF_MEM_LVL_HIT | b::PERF_MEM_LVL_L1) << b::PERF_MEM_LVL_SHIFT)
            | (b::PERF_MEM_SNOOP_HIT << b::PERF_MEM_SNOOP_SHIFT)
            | (b::PERF_MEM_TLB_HIT << b::PERF_MEM_TLB_SHIFT);
        let source = DataSource::new(raw);

        assert!(source.is_load());
        assert!(!source.is_store());
        assert!(!source.is_na());
        assert!(source.is_mem_hit());
        assert!(source.is_mem_l1());
        assert!(!source.is_mem_lfb());
        assert!(!source.is_mem_l2());
        assert!(!source.is_mem_l3());
        assert!(!source.is_mem_local_ram());
        assert!(source.is_snoop_hit());
        assert!(source.is_tlb_hit());
        assert_eq!(source.raw(), raw);

        let ram = DataSource::new(
            b::PERF_MEM_OP_STORE | (b::PERF_MEM_LVL_LOC_RAM << b::PERF_MEM_LVL_SHIFT),
        );
        assert!(ram.is_store());
        assert!(ram.is_mem_local_ram());
        assert!(!ram.is_mem_l1());
    }

    #[test]
    fn transaction_abort_predicates_round_trip() {
        let raw = b::PERF_TXN_TRANSACTION | b::PERF_TXN_RETRY | (0x42_u64 << b::PERF_TXN_ABORT_SHIFT);
        let abort = TransactionAbort::new(raw);

        assert!(abort.is_transaction());
        assert!(abort.is_retryable());
        assert!(!abort.is_elision());
        assert!(!abort.is_conflict());
        assert_eq!(abort.code(), 0x42);
    }

    #[test]
    fn cpu_modes_decode_from_misc() {
        assert_eq!(Mode::from_misc(b::PERF_RECORD_MISC_USER), Mode::User);
        assert_eq!(Mode::from_misc(b::PERF_RECORD_MISC_KERNEL), Mode::Kernel);
        assert_eq!(Mode::from_misc(b::PERF_RECORD_MISC_HYPERVISOR), Mode::Hypervisor);
        assert_eq!(Mode::from_misc(b::PERF_RECORD_MISC_GUEST_USER), Mode::GuestUser);
        assert_eq!(Mode::from_misc(b::PERF_RECORD_MISC_GUEST_KERNEL), Mode::GuestKernel);
        assert_eq!(
            Mode::from_misc(b::PERF_RECORD_MISC_CPUMODE_UNKNOWN | b::PERF_RECORD_MISC_EXACT_IP),
            Mode::Unknown
        );
    }
}
