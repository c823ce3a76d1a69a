//! Probes for the underlying hardware substrate: CPU vendor, the Intel
//! architectures that need an auxiliary sampling leader, AMD IBS support, and
//! the vendor event ids the kernel exports under
//! `/sys/bus/event_source/devices/`.

use std::fs;
use std::path::Path;

/// Access to information about the underlying hardware substrate.
pub struct HardwareInfo;

#[cfg(target_arch = "x86_64")]
fn cpuid_count(leaf: u32, sub_leaf: u32) -> Option<core::arch::x86_64::CpuidResult> {
    // CPUID is unprivileged; the max-leaf check guards the extended leaves.
    let max = unsafe { core::arch::x86_64::__cpuid(leaf & 0x8000_0000) }.eax;
    if max < leaf {
        return None;
    }
    Some(unsafe { core::arch::x86_64::__cpuid_count(leaf, sub_leaf) })
}

#[cfg(target_arch = "x86_64")]
fn vendor() -> [u8; 12] {
    let id = unsafe { core::arch::x86_64::__cpuid(0) };
    let mut vendor = [0; 12];
    vendor[..4].copy_from_slice(&id.ebx.to_le_bytes());
    vendor[4..8].copy_from_slice(&id.edx.to_le_bytes());
    vendor[8..].copy_from_slice(&id.ecx.to_le_bytes());
    vendor
}

#[cfg(target_arch = "x86_64")]
fn family_and_model() -> (u32, u32) {
    let id = unsafe { core::arch::x86_64::__cpuid(1) };
    let family = (id.eax >> 8) & 0xf;
    let extended_family = (id.eax >> 20) & 0xff;
    let model = (id.eax >> 4) & 0xf;
    let extended_model = (id.eax >> 16) & 0xf;
    if family == 0xf {
        (family + extended_family, (extended_model << 4) | model)
    } else if family == 6 {
        (family, (extended_model << 4) | model)
    } else {
        (family, model)
    }
}

impl HardwareInfo {
    /// True, if the underlying hardware is an Intel processor.
    pub fn is_intel() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            &vendor() == b"GenuineIntel"
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    /// True, if the underlying hardware is an AMD processor.
    pub fn is_amd() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            &vendor() == b"AuthenticAMD"
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    /// True, if the underlying Intel processor requires an auxiliary counter
    /// as group leader for precise memory sampling (Sapphire/Emerald Rapids
    /// and the Alder/Raptor Lake clients).
    pub fn is_intel_aux_counter_required() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            if !Self::is_intel() {
                return false;
            }
            matches!(
                family_and_model(),
                (6, 0x8f) | (6, 0xcf) | (6, 0x97) | (6, 0x9a) | (6, 0xbe) | (6, 0xb7) | (6, 0xba) | (6, 0xbf)
            )
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    /// True, if the underlying AMD processor supports Instruction Based
    /// Sampling (IBS).
    pub fn is_amd_ibs_supported() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            // CPUID 8000_0001h ECX bit 10, see
            // https://github.com/jlgreathouse/AMD_IBS_Toolkit/blob/master/ibs_with_perf_events.txt
            Self::is_amd()
                && cpuid_count(0x8000_0001, 0).is_some_and(|id| id.ecx & (1 << 10) > 0)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    /// True, if IBS can filter for L3 misses (CPUID 8000_001Bh EAX bit 11).
    pub fn is_ibs_l3_filter_supported() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            Self::is_amd_ibs_supported()
                && cpuid_count(0x8000_001b, 0).is_some_and(|id| id.eax & (1 << 11) > 0)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    /// The id of Intel's PEBS "mem-loads-aux" event.
    pub fn intel_pebs_mem_loads_aux_event_id() -> Option<u64> {
        Self::is_intel()
            .then(|| parse_event_umask("/sys/bus/event_source/devices/cpu/events/mem-loads-aux"))
            .flatten()
    }

    /// The id of Intel's PEBS "mem-loads" event.
    pub fn intel_pebs_mem_loads_event_id() -> Option<u64> {
        Self::is_intel()
            .then(|| parse_event_umask("/sys/bus/event_source/devices/cpu/events/mem-loads"))
            .flatten()
    }

    /// The id of Intel's PEBS "mem-stores" event.
    pub fn intel_pebs_mem_stores_event_id() -> Option<u64> {
        Self::is_intel()
            .then(|| parse_event_umask("/sys/bus/event_source/devices/cpu/events/mem-stores"))
            .flatten()
    }

    /// The PMU type for the IBS execution counter, if IBS is supported.
    pub fn amd_ibs_op_type() -> Option<u32> {
        Self::is_amd_ibs_supported()
            .then(|| parse_type("/sys/bus/event_source/devices/ibs_op/type"))
            .flatten()
    }

    /// The PMU type for the IBS fetch counter, if IBS is supported.
    pub fn amd_ibs_fetch_type() -> Option<u32> {
        Self::is_amd_ibs_supported()
            .then(|| parse_type("/sys/bus/event_source/devices/ibs_fetch/type"))
            .flatten()
    }
}

fn parse_type<P: AsRef<Path>>(path: P) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

// The sysfs event files look like "event=0xcd,umask=0x1,ldlat=3"; event and
// umask combine to the single id `<umask><event>`.
fn parse_event_umask<P: AsRef<Path>>(path: P) -> Option<u64> {
    let line = fs::read_to_string(path).ok()?;
    parse_event_umask_line(line.trim())
}

fn parse_event_umask_line(line: &str) -> Option<u64> {
    let mut event = None;
    let mut umask = None;

    for token in line.split(',') {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_start_matches("0x");
        match key.trim().to_ascii_lowercase().as_str() {
            "event" => event = Some(value.to_string()),
            "umask" => umask = Some(value.to_string()),
            _ => (),
        }
    }

    u64::from_str_radix(&format!("{}{}", umask?, event?), 16).ok()
}
