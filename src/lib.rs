//! Group-aware hardware performance counting and statistical sampling on
//! Linux, built on the `perf_event_open` system call.
//!
//! The crate composes multiple hardware events into kernel-scheduled
//! groups, corrects for counter multiplexing, and decodes the kernel's
//! binary sample stream from memory-mapped ring buffers into typed
//! [`Sample`][sample::Sample] values.
//!
//! ## Counting
//!
//! ```no_run
//! use perf_event_groups::config::Config;
//! use perf_event_groups::count::EventCounter;
//! use perf_event_groups::event::CounterDefinition;
//!
//! let definitions = CounterDefinition::new();
//! let mut counter = EventCounter::new(&definitions, Config::default());
//! counter.add_all(&["instructions", "cycles", "ipc"]).unwrap();
//!
//! counter.start().unwrap();
//! // ... measured region ...
//! counter.stop().unwrap();
//!
//! println!("{}", counter.result(1).to_table());
//! ```
//!
//! ## Sampling
//!
//! ```no_run
//! use perf_event_groups::config::SampleConfig;
//! use perf_event_groups::event::CounterDefinition;
//! use perf_event_groups::sample::{Sampler, Trigger};
//!
//! let definitions = CounterDefinition::new();
//! let mut config = SampleConfig::default();
//! config.period(10_000);
//!
//! let mut sampler = Sampler::new(&definitions, config);
//! sampler.trigger(vec![vec![Trigger::new("cycles")]]).unwrap();
//! sampler.values().time(true).instruction_pointer(true).callchain(true);
//!
//! sampler.start().unwrap();
//! // ... measured region ...
//! sampler.stop().unwrap();
//!
//! let samples = sampler.result(/* sort by time */ true);
//! sampler.close();
//! ```
//!
//! ## Permissions
//!
//! Access to performance events needs `CAP_PERFMON` or `CAP_SYS_ADMIN`,
//! or a permissive `/proc/sys/kernel/perf_event_paranoid` setting.
//!
//! ## Kernel compatibility
//!
//! Any kernel since 4.0 is supported. The cumulative `linux-4.2` …
//! `linux-5.13` cargo features gate sample fields and record types by the
//! kernel version they first appeared in; the default `latest` feature
//! enables everything.

pub mod config;
pub mod count;
pub mod error;
pub mod event;
pub mod sample;

mod ffi;

pub use config::{Config, SampleConfig};
pub use count::{CounterResult, EventCounter};
pub use error::{Error, Result};
pub use event::{CounterConfig, CounterDefinition, PeriodOrFrequency, Precision};
pub use sample::{Sample, SampleValues, Sampler, Trigger};
