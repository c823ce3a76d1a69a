//! Hand-written bindings for the parts of `<linux/perf_event.h>` this crate
//! touches.
//!
//! The values below are kernel ABI and never change once released; new fields
//! and flags are only ever appended. Layout references point into v6.13 of the
//! kernel tree.

#![allow(non_camel_case_types, dead_code)]

// perf_event_attr::type
pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_TYPE_HW_CACHE: u32 = 3;
pub const PERF_TYPE_RAW: u32 = 4;
pub const PERF_TYPE_BREAKPOINT: u32 = 5;

// perf_hw_id
pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
pub const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
pub const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
pub const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
pub const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
pub const PERF_COUNT_HW_BUS_CYCLES: u64 = 6;
pub const PERF_COUNT_HW_STALLED_CYCLES_FRONTEND: u64 = 7;
pub const PERF_COUNT_HW_STALLED_CYCLES_BACKEND: u64 = 8;
pub const PERF_COUNT_HW_REF_CPU_CYCLES: u64 = 9;

// perf_hw_cache_id, ops and results; combined as `id | (op << 8) | (result << 16)`
pub const PERF_COUNT_HW_CACHE_L1D: u64 = 0;
pub const PERF_COUNT_HW_CACHE_L1I: u64 = 1;
pub const PERF_COUNT_HW_CACHE_LL: u64 = 2;
pub const PERF_COUNT_HW_CACHE_DTLB: u64 = 3;
pub const PERF_COUNT_HW_CACHE_ITLB: u64 = 4;
pub const PERF_COUNT_HW_CACHE_BPU: u64 = 5;
pub const PERF_COUNT_HW_CACHE_NODE: u64 = 6;

pub const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
pub const PERF_COUNT_HW_CACHE_OP_WRITE: u64 = 1;
pub const PERF_COUNT_HW_CACHE_OP_PREFETCH: u64 = 2;

pub const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
pub const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

// perf_sw_ids
pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
pub const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
pub const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
pub const PERF_COUNT_SW_PAGE_FAULTS_MIN: u64 = 5;
pub const PERF_COUNT_SW_PAGE_FAULTS_MAJ: u64 = 6;
pub const PERF_COUNT_SW_ALIGNMENT_FAULTS: u64 = 7;
pub const PERF_COUNT_SW_EMULATION_FAULTS: u64 = 8;
pub const PERF_COUNT_SW_DUMMY: u64 = 9;
pub const PERF_COUNT_SW_BPF_OUTPUT: u64 = 10;
/// Since `linux-5.13`: <https://github.com/torvalds/linux/commit/d0d1dd628527c77db2391ce0293c1ed344b2365f>
pub const PERF_COUNT_SW_CGROUP_SWITCHES: u64 = 11;

// perf_event_sample_format
pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_ADDR: u64 = 1 << 3;
pub const PERF_SAMPLE_READ: u64 = 1 << 4;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const PERF_SAMPLE_ID: u64 = 1 << 6;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_SAMPLE_BRANCH_STACK: u64 = 1 << 11;
pub const PERF_SAMPLE_REGS_USER: u64 = 1 << 12;
pub const PERF_SAMPLE_STACK_USER: u64 = 1 << 13;
pub const PERF_SAMPLE_WEIGHT: u64 = 1 << 14;
pub const PERF_SAMPLE_DATA_SRC: u64 = 1 << 15;
pub const PERF_SAMPLE_IDENTIFIER: u64 = 1 << 16;
pub const PERF_SAMPLE_TRANSACTION: u64 = 1 << 17;
pub const PERF_SAMPLE_REGS_INTR: u64 = 1 << 18;
/// Since `linux-4.13`: <https://github.com/torvalds/linux/commit/fc7ce9c74c3ad232b084d80148654f926d01ece7>
pub const PERF_SAMPLE_PHYS_ADDR: u64 = 1 << 19;
/// Since `linux-5.7`: <https://github.com/torvalds/linux/commit/96aaab686505c449e24d76e76507290dcc30e008>
pub const PERF_SAMPLE_CGROUP: u64 = 1 << 21;
/// Since `linux-5.11`: <https://github.com/torvalds/linux/commit/8d97e71811aaafe4abf611dc24822fd6e73df1a1>
pub const PERF_SAMPLE_DATA_PAGE_SIZE: u64 = 1 << 22;
/// Since `linux-5.11`: <https://github.com/torvalds/linux/commit/995f088efebe1eba0282a6ffa12411b37f8990c2>
pub const PERF_SAMPLE_CODE_PAGE_SIZE: u64 = 1 << 23;
/// Since `linux-5.12`: <https://github.com/torvalds/linux/commit/2a6c6b7d7ad346f0679d0963cb19b3f0ea7ef32c>
pub const PERF_SAMPLE_WEIGHT_STRUCT: u64 = 1 << 24;

// perf_branch_sample_type
pub const PERF_SAMPLE_BRANCH_USER: u64 = 1 << 0;
pub const PERF_SAMPLE_BRANCH_KERNEL: u64 = 1 << 1;
pub const PERF_SAMPLE_BRANCH_HV: u64 = 1 << 2;
pub const PERF_SAMPLE_BRANCH_ANY: u64 = 1 << 3;
pub const PERF_SAMPLE_BRANCH_ANY_CALL: u64 = 1 << 4;
pub const PERF_SAMPLE_BRANCH_ANY_RETURN: u64 = 1 << 5;
pub const PERF_SAMPLE_BRANCH_IND_CALL: u64 = 1 << 6;
pub const PERF_SAMPLE_BRANCH_ABORT_TX: u64 = 1 << 7;
pub const PERF_SAMPLE_BRANCH_IN_TX: u64 = 1 << 8;
pub const PERF_SAMPLE_BRANCH_NO_TX: u64 = 1 << 9;
pub const PERF_SAMPLE_BRANCH_COND: u64 = 1 << 10;
pub const PERF_SAMPLE_BRANCH_CALL_STACK: u64 = 1 << 11;
/// Since `linux-4.2`: <https://github.com/torvalds/linux/commit/c9fdfa14c3792c0160849c484e83aa57afd80ccc>
pub const PERF_SAMPLE_BRANCH_IND_JUMP: u64 = 1 << 12;
/// Since `linux-4.4`: <https://github.com/torvalds/linux/commit/c229bf9dc179d2023e185c0f705bdf68484c1e73>
pub const PERF_SAMPLE_BRANCH_CALL: u64 = 1 << 13;

// perf_event_read_format
pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;
pub const PERF_FORMAT_ID: u64 = 1 << 2;
pub const PERF_FORMAT_GROUP: u64 = 1 << 3;

// perf_event_type (record types)
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_SAMPLE: u32 = 9;
/// Since `linux-4.3`: <https://github.com/torvalds/linux/commit/45ac1403f564f411c6a383a2448688ba8dd705a4>
pub const PERF_RECORD_SWITCH: u32 = 14;
pub const PERF_RECORD_SWITCH_CPU_WIDE: u32 = 15;
/// Since `linux-5.7`: <https://github.com/torvalds/linux/commit/96aaab686505c449e24d76e76507290dcc30e008>
pub const PERF_RECORD_CGROUP: u32 = 19;

// perf_event_header::misc
pub const PERF_RECORD_MISC_CPUMODE_MASK: u16 = 7;
pub const PERF_RECORD_MISC_CPUMODE_UNKNOWN: u16 = 0;
pub const PERF_RECORD_MISC_KERNEL: u16 = 1;
pub const PERF_RECORD_MISC_USER: u16 = 2;
pub const PERF_RECORD_MISC_HYPERVISOR: u16 = 3;
pub const PERF_RECORD_MISC_GUEST_KERNEL: u16 = 4;
pub const PERF_RECORD_MISC_GUEST_USER: u16 = 5;
pub const PERF_RECORD_MISC_SWITCH_OUT: u16 = 1 << 13;
pub const PERF_RECORD_MISC_EXACT_IP: u16 = 1 << 14;
// Shares the bit with EXACT_IP; which one applies depends on the record type.
/// Since `linux-4.17`: <https://github.com/torvalds/linux/commit/101592b4904ecf6b8ed2a4784d41d180319d95a1>
pub const PERF_RECORD_MISC_SWITCH_OUT_PREEMPT: u16 = 1 << 14;

// ioctls on the perf event fd, `_IO('$', n)` / `_IOR('$', 7, u64)`
pub const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
pub const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;
pub const PERF_EVENT_IOC_RESET: u64 = 0x2403;
pub const PERF_EVENT_IOC_ID: u64 = 0x8008_2407;

// perf_mem_data_src fields: op (bit 0), lvl (5), snoop (19), lock (24), dtlb (26)
pub const PERF_MEM_OP_NA: u64 = 1;
pub const PERF_MEM_OP_LOAD: u64 = 1 << 1;
pub const PERF_MEM_OP_STORE: u64 = 1 << 2;
pub const PERF_MEM_OP_PFETCH: u64 = 1 << 3;
pub const PERF_MEM_OP_EXEC: u64 = 1 << 4;

pub const PERF_MEM_LVL_SHIFT: u64 = 5;
pub const PERF_MEM_LVL_NA: u64 = 1;
pub const PERF_MEM_LVL_HIT: u64 = 1 << 1;
pub const PERF_MEM_LVL_MISS: u64 = 1 << 2;
pub const PERF_MEM_LVL_L1: u64 = 1 << 3;
pub const PERF_MEM_LVL_LFB: u64 = 1 << 4;
pub const PERF_MEM_LVL_L2: u64 = 1 << 5;
pub const PERF_MEM_LVL_L3: u64 = 1 << 6;
pub const PERF_MEM_LVL_LOC_RAM: u64 = 1 << 7;
pub const PERF_MEM_LVL_REM_RAM1: u64 = 1 << 8;
pub const PERF_MEM_LVL_REM_RAM2: u64 = 1 << 9;
pub const PERF_MEM_LVL_REM_CCE1: u64 = 1 << 10;
pub const PERF_MEM_LVL_REM_CCE2: u64 = 1 << 11;
pub const PERF_MEM_LVL_IO: u64 = 1 << 12;
pub const PERF_MEM_LVL_UNC: u64 = 1 << 13;

pub const PERF_MEM_SNOOP_SHIFT: u64 = 19;
pub const PERF_MEM_SNOOP_NA: u64 = 1;
pub const PERF_MEM_SNOOP_NONE: u64 = 1 << 1;
pub const PERF_MEM_SNOOP_HIT: u64 = 1 << 2;
pub const PERF_MEM_SNOOP_MISS: u64 = 1 << 3;
pub const PERF_MEM_SNOOP_HITM: u64 = 1 << 4;

pub const PERF_MEM_LOCK_SHIFT: u64 = 24;
pub const PERF_MEM_LOCK_NA: u64 = 1;
pub const PERF_MEM_LOCK_LOCKED: u64 = 1 << 1;

pub const PERF_MEM_TLB_SHIFT: u64 = 26;
pub const PERF_MEM_TLB_NA: u64 = 1;
pub const PERF_MEM_TLB_HIT: u64 = 1 << 1;
pub const PERF_MEM_TLB_MISS: u64 = 1 << 2;
pub const PERF_MEM_TLB_L1: u64 = 1 << 3;
pub const PERF_MEM_TLB_L2: u64 = 1 << 4;
pub const PERF_MEM_TLB_WK: u64 = 1 << 5;
pub const PERF_MEM_TLB_OS: u64 = 1 << 6;

// perf_txn abort fields
pub const PERF_TXN_ELISION: u64 = 1;
pub const PERF_TXN_TRANSACTION: u64 = 1 << 1;
pub const PERF_TXN_SYNC: u64 = 1 << 2;
pub const PERF_TXN_ASYNC: u64 = 1 << 3;
pub const PERF_TXN_RETRY: u64 = 1 << 4;
pub const PERF_TXN_CONFLICT: u64 = 1 << 5;
pub const PERF_TXN_CAPACITY_WRITE: u64 = 1 << 6;
pub const PERF_TXN_CAPACITY_READ: u64 = 1 << 7;
pub const PERF_TXN_ABORT_MASK: u64 = 0xffff_ffff << 32;
pub const PERF_TXN_ABORT_SHIFT: u64 = 32;

// perf_sample_regs_abi
pub const PERF_SAMPLE_REGS_ABI_NONE: u64 = 0;
pub const PERF_SAMPLE_REGS_ABI_32: u64 = 1;
pub const PERF_SAMPLE_REGS_ABI_64: u64 = 2;

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L385
// The flags bit-field of `perf_event_attr`, from `disabled` (bit 0) onwards.
const ATTR_BIT_DISABLED: u64 = 1 << 0;
const ATTR_BIT_INHERIT: u64 = 1 << 1;
const ATTR_BIT_EXCLUDE_USER: u64 = 1 << 4;
const ATTR_BIT_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_BIT_EXCLUDE_HV: u64 = 1 << 6;
const ATTR_BIT_EXCLUDE_IDLE: u64 = 1 << 7;
const ATTR_BIT_FREQ: u64 = 1 << 10;
const ATTR_PRECISE_IP_SHIFT: u64 = 15;
const ATTR_PRECISE_IP_MASK: u64 = 0b11 << ATTR_PRECISE_IP_SHIFT;
const ATTR_BIT_SAMPLE_ID_ALL: u64 = 1 << 18;
const ATTR_BIT_EXCLUDE_GUEST: u64 = 1 << 20;
const ATTR_BIT_CONTEXT_SWITCH: u64 = 1 << 26;
const ATTR_BIT_CGROUP: u64 = 1 << 32;
const ATTR_BIT_INHERIT_THREAD: u64 = 1 << 35;

/// `perf_event_attr`, laid out through `PERF_ATTR_SIZE_VER7` (128 bytes).
///
/// Kernels that know a shorter struct accept the longer one as long as the
/// trailing bytes are zero, so a zeroed default is always safe to hand to
/// `perf_event_open`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct perf_event_attr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    /// `sample_period` or `sample_freq`, switched by the `freq` flag bit.
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    __reserved_2: u16,
    pub aux_sample_size: u32,
    __reserved_3: u32,
    pub sig_data: u64,
}

macro_rules! attr_flag {
    ($set:ident, $get:ident, $bit:ident) => {
        pub fn $set(&mut self, value: bool) {
            if value {
                self.flags |= $bit;
            } else {
                self.flags &= !$bit;
            }
        }

        pub fn $get(&self) -> bool {
            self.flags & $bit > 0
        }
    };
}

impl perf_event_attr {
    attr_flag!(set_disabled, disabled, ATTR_BIT_DISABLED);
    attr_flag!(set_inherit, inherit, ATTR_BIT_INHERIT);
    attr_flag!(set_exclude_user, exclude_user, ATTR_BIT_EXCLUDE_USER);
    attr_flag!(set_exclude_kernel, exclude_kernel, ATTR_BIT_EXCLUDE_KERNEL);
    attr_flag!(set_exclude_hv, exclude_hv, ATTR_BIT_EXCLUDE_HV);
    attr_flag!(set_exclude_idle, exclude_idle, ATTR_BIT_EXCLUDE_IDLE);
    attr_flag!(set_exclude_guest, exclude_guest, ATTR_BIT_EXCLUDE_GUEST);
    attr_flag!(set_freq, freq, ATTR_BIT_FREQ);
    attr_flag!(set_sample_id_all, sample_id_all, ATTR_BIT_SAMPLE_ID_ALL);
    attr_flag!(set_context_switch, context_switch, ATTR_BIT_CONTEXT_SWITCH);
    attr_flag!(set_cgroup, cgroup, ATTR_BIT_CGROUP);
    attr_flag!(set_inherit_thread, inherit_thread, ATTR_BIT_INHERIT_THREAD);

    pub fn set_precise_ip(&mut self, value: u64) {
        self.flags = (self.flags & !ATTR_PRECISE_IP_MASK)
            | ((value << ATTR_PRECISE_IP_SHIFT) & ATTR_PRECISE_IP_MASK);
    }

    pub fn precise_ip(&self) -> u64 {
        (self.flags & ATTR_PRECISE_IP_MASK) >> ATTR_PRECISE_IP_SHIFT
    }
}

/// `perf_event_header`, the prefix of every ring-buffer record.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct perf_event_header {
    pub type_: u32,
    pub misc: u16,
    pub size: u16,
}

/// `perf_event_mmap_page`, the metadata page at offset 0 of the ring-buffer
/// mapping. Only `data_head` and `data_tail` are consumed by this crate.
// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L580
#[repr(C)]
pub struct perf_event_mmap_page {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    __reserved_1: u32,
    pub time_cycles: u64,
    pub time_mask: u64,
    __reserved: [u8; 116 * 8],
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub aux_head: u64,
    pub aux_tail: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}
