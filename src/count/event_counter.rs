use super::{CounterResult, Group};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{CounterConfig, CounterDefinition};

/// An event requested by name: either a hardware counter placed into a
/// group, or a metric evaluated against the hardware results afterwards.
pub(crate) enum Event {
    Counter {
        name: String,
        /// Pulled in by a metric but not requested by the user; omitted
        /// from the final result.
        hidden: bool,
        group_id: usize,
        in_group_id: usize,
    },
    Metric {
        name: String,
    },
}

/// The name-driven counting front end.
///
/// Resolves event names against a [`CounterDefinition`], packs the resolved
/// configs into kernel groups under the configured capacity limits, and
/// delivers a normalized, named [`CounterResult`] including derived metrics.
///
/// # Examples
///
/// ```no_run
/// use perf_event_groups::config::Config;
/// use perf_event_groups::count::EventCounter;
/// use perf_event_groups::event::CounterDefinition;
///
/// let definitions = CounterDefinition::new();
/// let mut counter = EventCounter::new(&definitions, Config::default());
/// counter.add_all(&["instructions", "cycles"]).unwrap();
///
/// counter.start().unwrap();
/// // ... measured region ...
/// counter.stop().unwrap();
///
/// println!("{}", counter.result(1).to_table());
/// ```
pub struct EventCounter<'a> {
    definitions: &'a CounterDefinition,
    config: Config,
    events: Vec<Event>,
    groups: Vec<Group>,
}

impl<'a> EventCounter<'a> {
    pub fn new(definitions: &'a CounterDefinition, config: Config) -> Self {
        Self {
            definitions,
            config,
            events: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds a counter or metric by name.
    ///
    /// The empty name is a *group break*: subsequent events go into a fresh
    /// kernel group. Breaking on an empty current group is a no-op; breaking
    /// beyond the configured number of groups fails.
    ///
    /// A metric name pulls in its required counters as hidden events; adding
    /// one of them explicitly afterwards un-hides it.
    pub fn add(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            if self.groups.last().map_or(true, Group::is_empty) {
                return Ok(());
            }
            if self.groups.len() < usize::from(self.config.max_groups) {
                self.groups.push(Group::new());
                return Ok(());
            }
            return Err(Error::TooManyGroups {
                max_groups: self.config.max_groups,
            });
        }

        if let Some((canonical, config)) = self.definitions.counter(name) {
            let canonical = canonical.to_string();
            return self.add_counter(canonical, config, false);
        }

        if let Some((canonical, metric)) = self.definitions.metric(name) {
            let canonical = canonical.to_string();
            let required: Vec<String> = metric
                .required_counter_names()
                .into_iter()
                .map(str::to_string)
                .collect();

            for required_name in required {
                let Some((dependent, config)) = self.definitions.counter(&required_name) else {
                    return Err(Error::UnknownCounterForMetric {
                        metric: canonical,
                        counter: required_name,
                    });
                };
                let dependent = dependent.to_string();
                self.add_counter(dependent, config, true)?;
            }

            self.events.push(Event::Metric { name: canonical });
            return Ok(());
        }

        Err(Error::UnknownName(name.to_string()))
    }

    /// Adds a list of names, stopping at the first failure.
    pub fn add_all(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.add(name)?;
        }
        Ok(())
    }

    fn add_counter(&mut self, name: String, config: CounterConfig, hidden: bool) -> Result<()> {
        // An event added twice keeps one slot; an explicit add un-hides a
        // metric-pulled counter.
        let existing = self.events.iter_mut().find(
            |event| matches!(event, Event::Counter { name: event_name, .. } if *event_name == name),
        );
        if let Some(Event::Counter { hidden: existing_hidden, .. }) = existing {
            *existing_hidden = *existing_hidden && hidden;
            return Ok(());
        }

        let group_is_full = self
            .groups
            .last()
            .map(|group| group.size() >= usize::from(self.config.max_counters_per_group))
            .unwrap_or(true);

        if group_is_full {
            if self.groups.len() >= usize::from(self.config.max_groups) {
                return Err(Error::TooManyCounters {
                    max_groups: self.config.max_groups,
                    max_counters_per_group: self.config.max_counters_per_group,
                });
            }
            self.groups.push(Group::new());
        }

        let group_id = self.groups.len() - 1;
        let group = self.groups.last_mut().unwrap();
        self.events.push(Event::Counter {
            name,
            hidden,
            group_id,
            in_group_id: group.size(),
        });
        group.add(config);

        Ok(())
    }

    /// Opens and starts all groups in insertion order. On failure every
    /// already-opened descriptor is released before the error surfaces.
    pub fn start(&mut self) -> Result<()> {
        let result = self.open_and_start();
        if result.is_err() {
            for group in &mut self.groups {
                group.close();
            }
        }
        result
    }

    fn open_and_start(&mut self) -> Result<()> {
        for group in &mut self.groups {
            group.open(&self.config)?;
        }
        for group in &mut self.groups {
            group.start()?;
        }
        Ok(())
    }

    /// Stops and closes all groups. Every group is attempted; the first
    /// error is reported.
    pub fn stop(&mut self) -> Result<()> {
        let mut first_error = None;

        for group in &mut self.groups {
            if let Err(e) = group.stop() {
                first_error.get_or_insert(e);
            }
        }
        for group in &mut self.groups {
            group.close();
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The measured values in user-visible insertion order, each divided by
    /// `normalization`. Hidden counters feed metric evaluation but are
    /// omitted from the returned result.
    pub fn result(&self, normalization: u64) -> CounterResult {
        Self::aggregate_result(std::slice::from_ref(self), normalization)
    }

    /// Shared result path for one instance and the multi-observer wrappers:
    /// hardware values are summed across instances before normalization and
    /// metric evaluation.
    pub(crate) fn aggregate_result(counters: &[EventCounter<'_>], normalization: u64) -> CounterResult {
        let Some(reference) = counters.first() else {
            return CounterResult::default();
        };

        // First pass: every hardware value, including hidden ones, keyed for
        // metric evaluation.
        let hardware_values: Vec<(String, f64)> = reference
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Counter { name, group_id, in_group_id, .. } => {
                    let sum: f64 = counters
                        .iter()
                        .map(|counter| counter.groups[*group_id].get(*in_group_id))
                        .sum();
                    Some((name.clone(), sum / normalization as f64))
                }
                Event::Metric { .. } => None,
            })
            .collect();
        let hardware_results = CounterResult::new(hardware_values);

        // Second pass: emit in insertion order, skipping hidden counters and
        // resolving metrics against the hardware values.
        let mut results = Vec::with_capacity(reference.events.len());
        for event in &reference.events {
            match event {
                Event::Counter { name, hidden: false, .. } => {
                    if let Some(value) = hardware_results.get(name) {
                        results.push((name.clone(), value));
                    }
                }
                Event::Counter { hidden: true, .. } => (),
                Event::Metric { name } => {
                    if let Some((canonical, metric)) = reference.definitions.metric(name) {
                        if let Some(value) = metric.calculate(&hardware_results) {
                            results.push((canonical.to_string(), value));
                        }
                    }
                }
            }
        }

        CounterResult::new(results)
    }

    pub(crate) fn groups(&self) -> &[Group] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::perf_unavailable;
    use super::*;

    fn small_config() -> Config {
        Config {
            max_groups: 2,
            max_counters_per_group: 2,
            ..Config::default()
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        assert!(matches!(
            counter.add("definitely-not-an-event"),
            Err(Error::UnknownName(name)) if name == "definitely-not-an-event"
        ));
    }

    #[test]
    fn group_break_splits_groups() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());

        counter.add("cycles").unwrap();
        counter.add("").unwrap();
        counter.add("cache-misses").unwrap();

        assert_eq!(counter.groups().len(), 2);
        assert_eq!(counter.groups()[0].size(), 1);
        assert_eq!(counter.groups()[1].size(), 1);
    }

    #[test]
    fn group_break_is_idempotent_on_an_empty_group() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, small_config());

        counter.add("").unwrap();
        counter.add("").unwrap();
        counter.add("cycles").unwrap();
        counter.add("").unwrap();
        counter.add("").unwrap();

        assert_eq!(counter.groups().len(), 2);
    }

    #[test]
    fn group_break_fails_when_groups_are_exhausted() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, small_config());

        counter.add("cycles").unwrap();
        counter.add("").unwrap();
        counter.add("instructions").unwrap();
        assert!(matches!(
            counter.add(""),
            Err(Error::TooManyGroups { max_groups: 2 })
        ));
    }

    #[test]
    fn capacity_overflow_is_rejected() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, small_config());

        // 2 groups x 2 counters fit.
        for name in ["cycles", "instructions", "branches", "cache-misses"] {
            counter.add(name).unwrap();
        }
        assert!(matches!(
            counter.add("branch-misses"),
            Err(Error::TooManyCounters { .. })
        ));
    }

    #[test]
    fn duplicate_adds_share_a_slot() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, small_config());

        counter.add("cycles").unwrap();
        counter.add("cycles").unwrap();
        counter.add("cycles").unwrap();

        assert_eq!(counter.groups().len(), 1);
        assert_eq!(counter.groups()[0].size(), 1);
    }

    #[test]
    fn metric_pulls_hidden_counters() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add("ipc").unwrap();

        // instructions and cycles are in the groups, but hidden.
        assert_eq!(counter.groups()[0].size(), 2);
        let result = counter.result(1);
        let names: Vec<&str> = result.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["ipc"]);
    }

    #[test]
    fn explicit_add_unhides_a_metric_counter() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add("ipc").unwrap();
        counter.add("instructions").unwrap();

        let result = counter.result(1);
        let names: Vec<&str> = result.iter().map(|(name, _)| name).collect();
        // "instructions" keeps its original (hidden) slot position and
        // becomes visible; the metric follows in insertion order.
        assert_eq!(names, vec!["instructions", "ipc"]);
    }

    #[test]
    fn result_names_follow_insertion_order() {
        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add_all(&["cycles", "branches", "instructions"]).unwrap();

        let names: Vec<String> = counter.result(1).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["cycles", "branches", "instructions"]);
    }

    #[test]
    fn count_instructions_and_cycles_end_to_end() {
        if perf_unavailable() {
            return;
        }

        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add_all(&["instructions", "cycles"]).unwrap();

        counter.start().unwrap();
        let mut value = 0_u64;
        for index in 0..10_000_u64 {
            value = std::hint::black_box(value.wrapping_add(index));
        }
        counter.stop().unwrap();

        let result = counter.result(1);
        let names: Vec<&str> = result.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["instructions", "cycles"]);
        assert!(result.get("instructions").unwrap() > 0.0);
        assert!(result.get("cycles").unwrap() > 0.0);

        let table = result.to_table();
        assert!(table.contains("instructions"));
        assert!(table.contains("cycles"));
    }

    #[test]
    fn metric_with_hidden_dependencies_end_to_end() {
        if perf_unavailable() {
            return;
        }

        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add("ipc").unwrap();

        counter.start().unwrap();
        std::hint::black_box((0..10_000_u64).sum::<u64>());
        counter.stop().unwrap();

        let result = counter.result(1);
        let names: Vec<&str> = result.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["ipc"]);
        assert!(result.get("ipc").unwrap() > 0.0);
    }

    #[test]
    fn restart_yields_independent_measurements() {
        if perf_unavailable() {
            return;
        }

        let definitions = CounterDefinition::new();
        let mut counter = EventCounter::new(&definitions, Config::default());
        counter.add("instructions").unwrap();

        counter.start().unwrap();
        let mut value = 0_u64;
        for index in 0..100_000_u64 {
            value = std::hint::black_box(value.wrapping_add(index));
        }
        counter.stop().unwrap();
        let first = counter.result(1).get("instructions").unwrap();

        counter.start().unwrap();
        counter.stop().unwrap();
        let second = counter.result(1).get("instructions").unwrap();

        assert!(first > 0.0);
        assert!(second < first);
    }
}
