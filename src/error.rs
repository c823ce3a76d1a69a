use thiserror::Error;

/// Errors surfaced by counting and sampling operations.
///
/// Every variant is fatal to the operation that produced it; descriptors and
/// buffers acquired before the failure are released before the error is
/// returned.
#[derive(Error, Debug)]
pub enum Error {
    /// The name matches neither a counter nor a metric in the definitions.
    #[error("cannot find counter or metric with name '{0}'")]
    UnknownName(String),

    /// A metric requires a counter that the definitions do not provide.
    #[error("cannot find counter '{counter}' for metric '{metric}'")]
    UnknownCounterForMetric { metric: String, counter: String },

    /// All groups are full and no new group can be opened.
    #[error("cannot add more counters: reached {max_groups} groups of {max_counters_per_group} counters each")]
    TooManyCounters {
        max_groups: u8,
        max_counters_per_group: u8,
    },

    /// The configured number of groups is exhausted.
    #[error("cannot add another group: maximal number of groups is {max_groups}")]
    TooManyGroups { max_groups: u8 },

    /// Metrics aggregate multiple events and cannot trigger samples.
    #[error("'{0}' is a metric; metrics are not supported as sampling triggers")]
    MetricAsTrigger(String),

    /// The sampler was started without any trigger group.
    #[error("no trigger for sampling specified")]
    NoTriggers,

    /// `perf_event_open` failed, after precision fallback where applicable.
    #[error("perf_event_open failed (errno {errno}): {source}")]
    OpenFailure {
        errno: i32,
        source: std::io::Error,
    },

    /// Reading the group leader at start time returned no bytes.
    #[error("failed to read counter start values from the group leader")]
    StartFailure,

    /// Reading the group leader at stop time returned no bytes.
    #[error("failed to read counter stop values from the group leader")]
    StopFailure,

    /// Mapping the sample ring-buffer failed.
    #[error("creating the sample buffer via mmap failed: {0}")]
    BufferAllocationFailure(std::io::Error),

    /// Start or stop was requested on a group without members.
    #[error("cannot start or stop an empty group")]
    EmptyGroup,
}

impl Error {
    pub(crate) fn open(source: std::io::Error) -> Self {
        Error::OpenFailure {
            errno: source.raw_os_error().unwrap_or(0),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
