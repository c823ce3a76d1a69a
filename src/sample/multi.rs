//! Fan-out sampling across worker threads, target processes, or CPUs: one
//! [`Sampler`] per observer, results concatenated and merged by time.

use super::{Sample, SampleValues, Sampler, Trigger};
use crate::config::SampleConfig;
use crate::error::Result;
use crate::event::CounterDefinition;

fn merged_result(samplers: &[Sampler<'_>], sort_by_time: bool) -> Vec<Sample> {
    let mut samples: Vec<Sample> = samplers
        .iter()
        .flat_map(|sampler| sampler.result(false))
        .collect();

    // Merge into one timeline only when every observer recorded TIME.
    if sort_by_time && samplers.iter().all(Sampler::recorded_time) {
        samples.sort_by_key(|sample| sample.time);
    }

    samples
}

/// One [`Sampler`] per worker thread. Each worker starts and stops its own
/// instance, identified by index, from its own thread.
pub struct MultiThreadSampler<'a> {
    samplers: Vec<Sampler<'a>>,
    values: SampleValues,
}

impl<'a> MultiThreadSampler<'a> {
    pub fn new(definitions: &'a CounterDefinition, num_threads: u16, config: SampleConfig) -> Self {
        let samplers = (0..num_threads)
            .map(|_| Sampler::new(definitions, config.clone()))
            .collect();
        Self {
            samplers,
            values: SampleValues::default(),
        }
    }

    /// The shared per-sample field selection, applied to every thread-local
    /// sampler on start.
    pub fn values(&mut self) -> &mut SampleValues {
        &mut self.values
    }

    /// Installs the same trigger groups on every thread-local sampler.
    pub fn trigger(&mut self, trigger_groups: Vec<Vec<Trigger>>) -> Result<&mut Self> {
        for sampler in &mut self.samplers {
            sampler.trigger(trigger_groups.clone())?;
        }
        Ok(self)
    }

    /// Starts the sampler of the calling worker thread.
    pub fn start(&mut self, thread_id: usize) -> Result<()> {
        let values = self.values.clone();
        let sampler = &mut self.samplers[thread_id];
        sampler.set_values(values);
        sampler.start()
    }

    /// Stops the sampler of the calling worker thread.
    pub fn stop(&mut self, thread_id: usize) -> Result<()> {
        self.samplers[thread_id].stop()
    }

    /// Concatenated samples of all threads, merged by time when requested.
    pub fn result(&self, sort_by_time: bool) -> Vec<Sample> {
        merged_result(&self.samplers, sort_by_time)
    }

    pub fn close(&mut self) {
        for sampler in &mut self.samplers {
            sampler.close();
        }
    }
}

/// One [`Sampler`] per observed process.
pub struct MultiProcessSampler<'a> {
    samplers: Vec<Sampler<'a>>,
    values: SampleValues,
}

impl<'a> MultiProcessSampler<'a> {
    pub fn new(definitions: &'a CounterDefinition, process_ids: &[i32], config: SampleConfig) -> Self {
        let samplers = process_ids
            .iter()
            .map(|&process_id| {
                let mut config = config.clone();
                config.base.process_id = process_id;
                Sampler::new(definitions, config)
            })
            .collect();
        Self {
            samplers,
            values: SampleValues::default(),
        }
    }

    pub fn values(&mut self) -> &mut SampleValues {
        &mut self.values
    }

    pub fn trigger(&mut self, trigger_groups: Vec<Vec<Trigger>>) -> Result<&mut Self> {
        for sampler in &mut self.samplers {
            sampler.trigger(trigger_groups.clone())?;
        }
        Ok(self)
    }

    pub fn start(&mut self) -> Result<()> {
        let values = self.values.clone();
        for sampler in &mut self.samplers {
            sampler.set_values(values.clone());
            sampler.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for sampler in &mut self.samplers {
            sampler.stop()?;
        }
        Ok(())
    }

    /// Concatenated samples of all processes, merged by time when requested.
    pub fn result(&self, sort_by_time: bool) -> Vec<Sample> {
        merged_result(&self.samplers, sort_by_time)
    }

    pub fn close(&mut self) {
        for sampler in &mut self.samplers {
            sampler.close();
        }
    }
}

/// One [`Sampler`] per CPU, observing every process on that CPU.
pub struct MultiCoreSampler<'a> {
    samplers: Vec<Sampler<'a>>,
    values: SampleValues,
}

impl<'a> MultiCoreSampler<'a> {
    pub fn new(definitions: &'a CounterDefinition, cpu_ids: &[u16], config: SampleConfig) -> Self {
        let samplers = cpu_ids
            .iter()
            .map(|&cpu_id| {
                let mut config = config.clone();
                // Record every thread/process on the given CPUs.
                config.base.process_id = -1;
                config.base.cpu_id = Some(cpu_id);
                Sampler::new(definitions, config)
            })
            .collect();
        Self {
            samplers,
            values: SampleValues::default(),
        }
    }

    pub fn values(&mut self) -> &mut SampleValues {
        &mut self.values
    }

    pub fn trigger(&mut self, trigger_groups: Vec<Vec<Trigger>>) -> Result<&mut Self> {
        for sampler in &mut self.samplers {
            sampler.trigger(trigger_groups.clone())?;
        }
        Ok(self)
    }

    pub fn start(&mut self) -> Result<()> {
        let values = self.values.clone();
        for sampler in &mut self.samplers {
            sampler.set_values(values.clone());
            sampler.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for sampler in &mut self.samplers {
            sampler.stop()?;
        }
        Ok(())
    }

    /// Concatenated samples of all CPUs, merged by time when requested.
    pub fn result(&self, sort_by_time: bool) -> Vec<Sample> {
        merged_result(&self.samplers, sort_by_time)
    }

    pub fn close(&mut self) {
        for sampler in &mut self.samplers {
            sampler.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_triggers_are_rejected_on_every_instance() {
        let definitions = CounterDefinition::new();
        let mut multi = MultiThreadSampler::new(&definitions, 2, SampleConfig::default());
        assert!(multi.trigger(vec![vec![Trigger::new("ipc")]]).is_err());
    }

    #[test]
    fn merged_result_of_idle_samplers_is_empty() {
        let definitions = CounterDefinition::new();
        let mut multi = MultiCoreSampler::new(&definitions, &[0], SampleConfig::default());
        multi.values().time(true);
        multi.trigger(vec![vec![Trigger::new("cycles")]]).unwrap();
        // Never started: no buffers, no samples.
        assert!(multi.result(true).is_empty());
    }
}
