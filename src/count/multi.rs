//! Fan-out counting across worker threads, target processes, or CPUs: one
//! [`EventCounter`] per observer, merged into a single result.

use super::{CounterResult, EventCounter};
use crate::config::Config;
use crate::error::Result;
use crate::event::CounterDefinition;

/// One [`EventCounter`] per worker thread.
///
/// Every worker must call [`start`][Self::start] and [`stop`][Self::stop]
/// with its own index from its own thread, so each instance opens its
/// descriptors against the calling thread.
pub struct MultiThreadEventCounter<'a> {
    counters: Vec<EventCounter<'a>>,
}

impl<'a> MultiThreadEventCounter<'a> {
    pub fn new(definitions: &'a CounterDefinition, num_threads: u16, config: Config) -> Self {
        let counters = (0..num_threads)
            .map(|_| EventCounter::new(definitions, config.clone()))
            .collect();
        Self { counters }
    }

    /// Adds a counter or metric by name on every thread-local instance.
    pub fn add(&mut self, name: &str) -> Result<()> {
        for counter in &mut self.counters {
            counter.add(name)?;
        }
        Ok(())
    }

    pub fn add_all(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.add(name)?;
        }
        Ok(())
    }

    /// Starts the instance of the calling worker thread.
    pub fn start(&mut self, thread_id: usize) -> Result<()> {
        self.counters[thread_id].start()
    }

    /// Stops the instance of the calling worker thread.
    pub fn stop(&mut self, thread_id: usize) -> Result<()> {
        self.counters[thread_id].stop()
    }

    /// Values summed over all threads, then normalized.
    pub fn result(&self, normalization: u64) -> CounterResult {
        EventCounter::aggregate_result(&self.counters, normalization)
    }
}

/// One [`EventCounter`] per observed process.
pub struct MultiProcessEventCounter<'a> {
    counters: Vec<EventCounter<'a>>,
}

impl<'a> MultiProcessEventCounter<'a> {
    pub fn new(definitions: &'a CounterDefinition, process_ids: &[i32], config: Config) -> Self {
        let counters = process_ids
            .iter()
            .map(|&process_id| {
                let mut config = config.clone();
                config.process_id = process_id;
                EventCounter::new(definitions, config)
            })
            .collect();
        Self { counters }
    }

    pub fn add(&mut self, name: &str) -> Result<()> {
        for counter in &mut self.counters {
            counter.add(name)?;
        }
        Ok(())
    }

    pub fn add_all(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.add(name)?;
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        for counter in &mut self.counters {
            counter.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for counter in &mut self.counters {
            counter.stop()?;
        }
        Ok(())
    }

    /// Values summed over all observed processes, then normalized.
    pub fn result(&self, normalization: u64) -> CounterResult {
        EventCounter::aggregate_result(&self.counters, normalization)
    }
}

/// One [`EventCounter`] per CPU, observing every process on that CPU.
pub struct MultiCoreEventCounter<'a> {
    counters: Vec<EventCounter<'a>>,
}

impl<'a> MultiCoreEventCounter<'a> {
    pub fn new(definitions: &'a CounterDefinition, cpu_ids: &[u16], config: Config) -> Self {
        let counters = cpu_ids
            .iter()
            .map(|&cpu_id| {
                let mut config = config.clone();
                // Record every thread/process on the given CPUs.
                config.process_id = -1;
                config.cpu_id = Some(cpu_id);
                EventCounter::new(definitions, config)
            })
            .collect();
        Self { counters }
    }

    pub fn add(&mut self, name: &str) -> Result<()> {
        for counter in &mut self.counters {
            counter.add(name)?;
        }
        Ok(())
    }

    pub fn add_all(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.add(name)?;
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        for counter in &mut self.counters {
            counter.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for counter in &mut self.counters {
            counter.stop()?;
        }
        Ok(())
    }

    /// Values summed over all observed CPUs, then normalized.
    pub fn result(&self, normalization: u64) -> CounterResult {
        EventCounter::aggregate_result(&self.counters, normalization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_process_configs_carry_their_pid() {
        let definitions = CounterDefinition::new();
        let multi = MultiProcessEventCounter::new(&definitions, &[100, 200], Config::default());
        assert_eq!(multi.counters[0].config().process_id, 100);
        assert_eq!(multi.counters[1].config().process_id, 200);
    }

    #[test]
    fn per_core_configs_observe_all_processes() {
        let definitions = CounterDefinition::new();
        let multi = MultiCoreEventCounter::new(&definitions, &[0, 3], Config::default());
        for (counter, cpu) in multi.counters.iter().zip([0, 3]) {
            assert_eq!(counter.config().process_id, -1);
            assert_eq!(counter.config().cpu_id, Some(cpu));
        }
    }

    #[test]
    fn results_sum_across_instances() {
        use std::sync::Mutex;

        if super::super::tests::perf_unavailable() {
            return;
        }

        let definitions = CounterDefinition::new();
        let mut multi = MultiThreadEventCounter::new(&definitions, 2, Config::default());
        multi.add("instructions").unwrap();

        let multi = Mutex::new(multi);
        std::thread::scope(|scope| {
            for thread_id in 0..2 {
                let multi = &multi;
                scope.spawn(move || {
                    multi.lock().unwrap().start(thread_id).unwrap();
                    let mut value = 0_u64;
                    for index in 0..50_000_u64 {
                        value = std::hint::black_box(value.wrapping_add(index));
                    }
                    std::hint::black_box(value);
                    multi.lock().unwrap().stop(thread_id).unwrap();
                });
            }
        });

        let result = multi.lock().unwrap().result(1);
        assert!(result.get("instructions").unwrap() > 0.0);
    }
}
