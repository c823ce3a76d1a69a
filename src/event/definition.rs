use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use super::hardware::HardwareInfo;
use super::metric::{
    CacheHitRatio, CyclesPerInstruction, DTLBMissRatio, ITLBMissRatio, InstructionsPerCycle,
    L1DataMissRatio, Metric,
};
use super::CounterConfig;
use crate::ffi::bindings as b;

/// The catalogue of counter names and derived metrics.
///
/// Construction seeds the generalized hardware/software events, the built-in
/// metrics, and the vendor events (AMD IBS, Intel PEBS) the running CPU
/// supports. Additional raw events can be registered programmatically or read
/// from a CSV configuration file.
///
/// The catalogue must outlive every [`EventCounter`][crate::count::EventCounter]
/// and [`Sampler`][crate::sample::Sampler] borrowing from it.
pub struct CounterDefinition {
    counter_configs: HashMap<String, CounterConfig>,
    metrics: HashMap<String, Box<dyn Metric>>,
}

impl Default for CounterDefinition {
    fn default() -> Self {
        let mut definition = Self {
            counter_configs: HashMap::with_capacity(128),
            metrics: HashMap::with_capacity(16),
        };
        definition.initialize_generalized_counters();
        definition.initialize_amd_ibs_counters();
        definition.initialize_intel_pebs_counters();
        definition
    }
}

impl CounterDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the catalogue and reads additional counters from the given
    /// CSV configuration file.
    pub fn from_file<P: AsRef<Path>>(config_file: P) -> io::Result<Self> {
        let mut definition = Self::default();
        definition.read_counter_configuration(config_file)?;
        Ok(definition)
    }

    /// Registers a counter under the given name.
    pub fn add(&mut self, name: impl Into<String>, config: CounterConfig) {
        self.counter_configs.insert(name.into(), config);
    }

    /// Registers a raw PMU event under the given name.
    pub fn add_raw(&mut self, name: impl Into<String>, event_id: u64) {
        self.add(name, CounterConfig::new(b::PERF_TYPE_RAW, event_id));
    }

    /// Registers a metric under its own name.
    pub fn add_metric(&mut self, metric: Box<dyn Metric>) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    /// Looks up a counter; returns the canonical name and its config.
    pub fn counter(&self, name: &str) -> Option<(&str, CounterConfig)> {
        self.counter_configs
            .get_key_value(name)
            .map(|(name, config)| (name.as_str(), *config))
    }

    /// Looks up a metric; returns the canonical name and the metric.
    pub fn metric(&self, name: &str) -> Option<(&str, &dyn Metric)> {
        self.metrics
            .get_key_value(name)
            .map(|(name, metric)| (name.as_str(), metric.as_ref()))
    }

    pub fn is_metric(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Names of all registered counters.
    pub fn names(&self) -> Vec<&str> {
        self.counter_configs.keys().map(String::as_str).collect()
    }

    /// Reads counters from a CSV file with lines of the form
    /// `name,<config>[,<extended config>[,<type>]]`, where the numeric fields
    /// accept `0x`-prefixed hex.
    pub fn read_counter_configuration<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let file = fs::File::open(path)?;
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            let mut fields = line.split(',').map(str::trim);

            let Some(name) = fields.next().filter(|name| !name.is_empty()) else {
                continue;
            };
            let Some(event_id) = fields.next().and_then(parse_u64) else {
                continue;
            };
            let extension = fields.next().and_then(parse_u64).unwrap_or(0);
            let type_ = fields
                .next()
                .and_then(parse_u64)
                .map(|type_| type_ as u32)
                .unwrap_or(b::PERF_TYPE_RAW);

            self.add(
                name.to_string(),
                CounterConfig::with_extension(type_, event_id, extension, 0),
            );
        }
        Ok(())
    }

    fn initialize_generalized_counters(&mut self) {
        let hw = |event_id| CounterConfig::new(b::PERF_TYPE_HARDWARE, event_id);
        let sw = |event_id| CounterConfig::new(b::PERF_TYPE_SOFTWARE, event_id);
        let cache = |id, op, result| {
            CounterConfig::new(b::PERF_TYPE_HW_CACHE, id | (op << 8) | (result << 16))
        };

        self.add("instructions", hw(b::PERF_COUNT_HW_INSTRUCTIONS));

        self.add("cycles", hw(b::PERF_COUNT_HW_CPU_CYCLES));
        self.add("cpu-cycles", hw(b::PERF_COUNT_HW_CPU_CYCLES));
        self.add("bus-cycles", hw(b::PERF_COUNT_HW_BUS_CYCLES));

        self.add("branches", hw(b::PERF_COUNT_HW_BRANCH_INSTRUCTIONS));
        self.add("branch-instructions", hw(b::PERF_COUNT_HW_BRANCH_INSTRUCTIONS));
        self.add("branch-misses", hw(b::PERF_COUNT_HW_BRANCH_MISSES));

        self.add("stalled-cycles-backend", hw(b::PERF_COUNT_HW_STALLED_CYCLES_BACKEND));
        self.add("idle-cycles-backend", hw(b::PERF_COUNT_HW_STALLED_CYCLES_BACKEND));
        self.add("stalled-cycles-frontend", hw(b::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND));
        self.add("idle-cycles-frontend", hw(b::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND));

        self.add("cpu-clock", sw(b::PERF_COUNT_SW_CPU_CLOCK));
        self.add("task-clock", sw(b::PERF_COUNT_SW_TASK_CLOCK));
        self.add("page-faults", sw(b::PERF_COUNT_SW_PAGE_FAULTS));
        self.add("faults", sw(b::PERF_COUNT_SW_PAGE_FAULTS));
        self.add("major-faults", sw(b::PERF_COUNT_SW_PAGE_FAULTS_MAJ));
        self.add("minor-faults", sw(b::PERF_COUNT_SW_PAGE_FAULTS_MIN));
        self.add("alignment-faults", sw(b::PERF_COUNT_SW_ALIGNMENT_FAULTS));
        self.add("emulation-faults", sw(b::PERF_COUNT_SW_EMULATION_FAULTS));
        self.add("context-switches", sw(b::PERF_COUNT_SW_CONTEXT_SWITCHES));
        self.add("bpf-output", sw(b::PERF_COUNT_SW_BPF_OUTPUT));
        #[cfg(feature = "linux-5.13")]
        self.add("cgroup-switches", sw(b::PERF_COUNT_SW_CGROUP_SWITCHES));
        self.add("cpu-migrations", sw(b::PERF_COUNT_SW_CPU_MIGRATIONS));
        self.add("migrations", sw(b::PERF_COUNT_SW_CPU_MIGRATIONS));

        self.add("cache-misses", hw(b::PERF_COUNT_HW_CACHE_MISSES));
        self.add("cache-references", hw(b::PERF_COUNT_HW_CACHE_REFERENCES));
        self.add(
            "L1-dcache-loads",
            cache(b::PERF_COUNT_HW_CACHE_L1D, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
        );
        self.add(
            "L1-dcache-load-misses",
            cache(b::PERF_COUNT_HW_CACHE_L1D, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_MISS),
        );
        self.add(
            "L1-icache-loads",
            cache(b::PERF_COUNT_HW_CACHE_L1I, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
        );
        self.add(
            "L1-icache-load-misses",
            cache(b::PERF_COUNT_HW_CACHE_L1I, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_MISS),
        );

        self.add(
            "dTLB-loads",
            cache(b::PERF_COUNT_HW_CACHE_DTLB, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
        );
        self.add(
            "dTLB-load-misses",
            cache(b::PERF_COUNT_HW_CACHE_DTLB, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_MISS),
        );
        self.add(
            "iTLB-loads",
            cache(b::PERF_COUNT_HW_CACHE_ITLB, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
        );
        self.add(
            "iTLB-load-misses",
            cache(b::PERF_COUNT_HW_CACHE_ITLB, b::PERF_COUNT_HW_CACHE_OP_READ, b::PERF_COUNT_HW_CACHE_RESULT_MISS),
        );

        self.add_metric(Box::new(InstructionsPerCycle));
        self.add_metric(Box::new(CyclesPerInstruction));
        self.add_metric(Box::new(CacheHitRatio));
        self.add_metric(Box::new(DTLBMissRatio));
        self.add_metric(Box::new(ITLBMissRatio));
        self.add_metric(Box::new(L1DataMissRatio));
    }

    fn initialize_amd_ibs_counters(&mut self) {
        if let Some(ibs_op) = HardwareInfo::amd_ibs_op_type() {
            self.add("ibs_op", CounterConfig::new(ibs_op, 0));
            self.add("ibs_op_uops", CounterConfig::new(ibs_op, 1 << 19));

            if HardwareInfo::is_ibs_l3_filter_supported() {
                self.add("ibs_op_l3missonly", CounterConfig::new(ibs_op, 1 << 16));
                self.add(
                    "ibs_op_uops_l3missonly",
                    CounterConfig::new(ibs_op, (1 << 19) | (1 << 16)),
                );
            }
        }

        if let Some(ibs_fetch) = HardwareInfo::amd_ibs_fetch_type() {
            self.add("ibs_fetch", CounterConfig::new(ibs_fetch, 1 << 57));

            if HardwareInfo::is_ibs_l3_filter_supported() {
                self.add(
                    "ibs_fetch_l3missonly",
                    CounterConfig::new(ibs_fetch, (1 << 57) | (1 << 16)),
                );
            }
        }
    }

    fn initialize_intel_pebs_counters(&mut self) {
        if !HardwareInfo::is_intel() {
            return;
        }

        if HardwareInfo::is_intel_aux_counter_required() {
            // The auxiliary event that must lead a memory-sampling group on
            // Sapphire Rapids and friends; it produces no samples itself.
            if let Some(event_id) = HardwareInfo::intel_pebs_mem_loads_aux_event_id() {
                self.add(
                    "mem-loads-aux",
                    CounterConfig::new(b::PERF_TYPE_RAW, event_id).auxiliary(),
                );
            }
        }

        if let Some(event_id) = HardwareInfo::intel_pebs_mem_loads_event_id() {
            self.add("mem-loads", CounterConfig::new(b::PERF_TYPE_RAW, event_id));
        }

        if let Some(event_id) = HardwareInfo::intel_pebs_mem_stores_event_id() {
            self.add("mem-stores", CounterConfig::new(b::PERF_TYPE_RAW, event_id));
        }
    }
}

fn parse_u64(field: &str) -> Option<u64> {
    if let Some(hex) = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        field.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn generalized_counters_are_seeded() {
        let definition = CounterDefinition::new();

        let (name, config) = definition.counter("instructions").unwrap();
        assert_eq!(name, "instructions");
        assert_eq!(config.type_(), b::PERF_TYPE_HARDWARE);
        assert_eq!(config.event_id(), b::PERF_COUNT_HW_INSTRUCTIONS);

        // Aliases resolve to the same event.
        let (_, cycles) = definition.counter("cycles").unwrap();
        let (_, cpu_cycles) = definition.counter("cpu-cycles").unwrap();
        assert_eq!(cycles.event_id(), cpu_cycles.event_id());

        assert!(definition.counter("no-such-counter").is_none());
    }

    #[test]
    fn cache_events_pack_op_and_result() {
        let definition = CounterDefinition::new();
        let (_, config) = definition.counter("L1-dcache-load-misses").unwrap();
        assert_eq!(config.type_(), b::PERF_TYPE_HW_CACHE);
        assert_eq!(
            config.event_id(),
            b::PERF_COUNT_HW_CACHE_L1D
                | (b::PERF_COUNT_HW_CACHE_OP_READ << 8)
                | (b::PERF_COUNT_HW_CACHE_RESULT_MISS << 16)
        );
    }

    #[test]
    fn metrics_are_distinguished_from_counters() {
        let definition = CounterDefinition::new();
        assert!(definition.is_metric("ipc"));
        assert!(definition.is_metric("cache-hit-ratio"));
        assert!(!definition.is_metric("cycles"));

        let (name, metric) = definition.metric("ipc").unwrap();
        assert_eq!(name, "ipc");
        assert_eq!(metric.required_counter_names(), vec!["instructions", "cycles"]);
    }

    #[test]
    fn csv_configuration_is_parsed() {
        let mut path = std::env::temp_dir();
        path.push(format!("counter-config-{}.csv", std::process::id()));
        {
            let mut file = fs::File::create(&path).unwrap();
            writeln!(file, "retired_uops,0x10000c1").unwrap();
            writeln!(file, "cycles_no_exec,0x01a6,0x02,4").unwrap();
            writeln!(file, "plain_decimal,193").unwrap();
            writeln!(file, ",missing-name").unwrap();
        }

        let definition = CounterDefinition::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let (_, config) = definition.counter("retired_uops").unwrap();
        assert_eq!(config.event_id(), 0x10000c1);
        assert_eq!(config.type_(), b::PERF_TYPE_RAW);

        let (_, config) = definition.counter("cycles_no_exec").unwrap();
        assert_eq!(config.event_id(), 0x01a6);
        assert_eq!(config.event_id_extension()[0], 0x02);
        assert_eq!(config.type_(), 4);

        let (_, config) = definition.counter("plain_decimal").unwrap();
        assert_eq!(config.event_id(), 193);
    }
}
