use serde::Serialize;
use std::fmt;

/// Kernel device number of a block device, packed into one integer.
///
/// The layout is `major << 8 | minor`: the major number lives in the high
/// bits and the minor number in the low 8 bits. Both the registry (from
/// `stat`) and the diskstats parser build ids through [`DeviceId::new`], so
/// the two sides always agree on the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn new(major: u64, minor: u64) -> Self {
        DeviceId(mkdev(major, minor))
    }

    pub fn major(self) -> u64 {
        self.0 >> 8
    }

    pub fn minor(self) -> u64 {
        self.0 & 0xff
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Packs a (major, minor) pair: major in the high bits, minor in the low 8.
pub const fn mkdev(major: u64, minor: u64) -> u64 {
    (major << 8) | minor
}

/// Cumulative completed-operation counters of one device at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounters {
    pub reads:  u64,
    pub writes: u64,
}

/// Outcome of comparing a fresh sample with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// No earlier sample existed, so nothing can be said about idleness.
    FirstSample,
    Active,
    Idle,
}

impl IdleVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            IdleVerdict::FirstSample => "first-sample",
            IdleVerdict::Active      => "active",
            IdleVerdict::Idle        => "idle",
        }
    }
}

/// One device the operator asked us to watch.
#[derive(Debug, Clone)]
pub struct TrackedDevice {
    /// Path exactly as given by the operator, handed to the spin-down action.
    pub name: String,
    pub id:   DeviceId,
    /// Last observed counters; `None` until the first sample arrives.
    pub last: Option<OperationCounters>,
}

impl TrackedDevice {
    pub fn new(name: String, id: DeviceId) -> Self {
        Self { name, id, last: None }
    }

    /// Stores `sample` and classifies it against the previous one.
    ///
    /// Idle means reads and writes did not move and nothing is in flight.
    pub fn observe(&mut self, sample: OperationCounters, in_progress: u64) -> IdleVerdict {
        match self.last.replace(sample) {
            None => IdleVerdict::FirstSample,
            Some(prev) if prev == sample && in_progress == 0 => IdleVerdict::Idle,
            Some(_) => IdleVerdict::Active,
        }
    }
}
