use crate::collectors::diskstats::DiskstatsFeed;
use crate::error::Result;
use crate::models::device::IdleVerdict;
use crate::registry::DeviceRegistry;
use crate::spindown::SpinDown;
use std::io::{Read, Seek};
use std::time::Duration;
use tracing::{debug, info};

/// What one pass over the feed did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Lines parsed from the feed.
    pub records:   usize,
    /// Lines that belonged to a tracked device.
    pub matched:   usize,
    /// Devices handed to the spin-down action, in feed order.
    pub spun_down: Vec<String>,
}

/// Samples the feed every `interval` and spins down devices whose counters
/// stood still across the last interval.
///
/// A device that goes quiet halfway through an interval is only noticed at
/// the following boundary, so up to twice `interval` may pass before it is
/// spun down. A device that stays idle is handed to the action again on
/// every cycle.
pub struct IdleMonitor<'a, R, S> {
    registry: &'a mut DeviceRegistry,
    feed:     DiskstatsFeed<R>,
    action:   S,
    interval: Duration,
}

impl<'a, R: Read + Seek, S: SpinDown> IdleMonitor<'a, R, S> {
    pub fn new(
        registry: &'a mut DeviceRegistry,
        feed:     DiskstatsFeed<R>,
        action:   S,
        interval: Duration,
    ) -> Self {
        Self { registry, feed, action, interval }
    }

    /// Samples forever. Returns only with the error that stopped it.
    pub fn run(&mut self) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            devices = self.registry.len(),
            feed = self.feed.path(),
            "monitoring for idle devices"
        );
        loop {
            self.cycle()?;
            std::thread::sleep(self.interval);
        }
    }

    /// One full pass: rewind, parse every line, update tracked devices and
    /// spin down the idle ones. The first error ends the pass.
    pub fn cycle(&mut self) -> Result<CycleReport> {
        let registry = &mut *self.registry;
        let action = &mut self.action;
        let mut report = CycleReport::default();

        let records = self.feed.for_each_record(|rec| {
            let Some((verdict, dev)) = registry.update_and_check_idle(rec.id, rec.counters, rec.in_progress) else {
                return Ok(());
            };
            report.matched += 1;
            debug!(
                device = %dev.name,
                reads = rec.counters.reads,
                writes = rec.counters.writes,
                in_progress = rec.in_progress,
                verdict = verdict.label(),
                "sampled"
            );

            if verdict == IdleVerdict::Idle {
                info!(device = %dev.name, "spinning down");
                action.spin_down(&dev.name)?;
                report.spun_down.push(dev.name.clone());
            }
            Ok(())
        })?;

        report.records = records;
        Ok(report)
    }
}
