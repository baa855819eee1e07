use crate::error::{MonitorError, Result};
use crate::models::device::{DeviceId, IdleVerdict, OperationCounters, TrackedDevice};
use nix::sys::stat::{major, minor, stat, SFlag};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Every device being watched, keyed by its packed device number.
///
/// Entries are created at startup only; the monitor updates them in place.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, TrackedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from the operator's device list, stopping at the
    /// first path that cannot be resolved.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut registry = Self::new();
        for path in paths {
            registry.register(path.as_ref())?;
        }
        Ok(registry)
    }

    /// Resolves `path` to its block device number and starts tracking it.
    ///
    /// Two paths naming the same device collapse into one entry; the later
    /// path wins.
    pub fn register(&mut self, path: &Path) -> Result<DeviceId> {
        let id = resolve(path)?;
        self.insert(path.display().to_string(), id);
        Ok(id)
    }

    /// Tracks `name` under an already known id.
    pub fn insert(&mut self, name: String, id: DeviceId) {
        if let Some(prev) = self.devices.insert(id, TrackedDevice::new(name, id)) {
            warn!(device = %prev.name, id = %id, "device listed twice, keeping the later path");
        }
    }

    pub fn lookup(&self, id: DeviceId) -> Option<&TrackedDevice> {
        self.devices.get(&id)
    }

    /// Swaps in the new counters for `id` and reports what changed, along
    /// with the device the verdict is about.
    ///
    /// Returns `None` when `id` is not tracked. The compare and the store
    /// happen under the same `&mut self` borrow.
    pub fn update_and_check_idle(
        &mut self,
        id: DeviceId,
        counters: OperationCounters,
        in_progress: u64,
    ) -> Option<(IdleVerdict, &TrackedDevice)> {
        let dev = self.devices.get_mut(&id)?;
        let verdict = dev.observe(counters, in_progress);
        Some((verdict, &*dev))
    }

    pub fn len(&self) -> usize { self.devices.len() }

    /// Tracked devices ordered by device number.
    pub fn devices(&self) -> Vec<&TrackedDevice> {
        let mut out: Vec<&TrackedDevice> = self.devices.values().collect();
        out.sort_by_key(|d| d.id);
        out
    }
}

/// `stat`s `path` and packs the major/minor of the block device it names.
pub fn resolve(path: &Path) -> Result<DeviceId> {
    let st = stat(path).map_err(|e| MonitorError::Resolution {
        path:   path.display().to_string(),
        detail: e.desc().to_string(),
    })?;

    let kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
    if kind != SFlag::S_IFBLK {
        return Err(MonitorError::Resolution {
            path:   path.display().to_string(),
            detail: "not a block device".into(),
        });
    }

    let rdev = st.st_rdev;
    Ok(DeviceId::new(major(rdev), minor(rdev)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(reads: u64, writes: u64) -> OperationCounters {
        OperationCounters { reads, writes }
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let mut reg = DeviceRegistry::new();
        reg.insert("/dev/sda".into(), DeviceId::new(8, 0));
        assert!(reg.lookup(DeviceId::new(8, 1)).is_none());
        assert!(reg.update_and_check_idle(DeviceId::new(8, 1), counters(1, 1), 0).is_none());
        assert!(reg.lookup(DeviceId::new(8, 0)).and_then(|d| d.last).is_none());
        assert_eq!(reg.lookup(DeviceId::new(8, 0)).map(|d| d.name.as_str()), Some("/dev/sda"));
    }

    #[test]
    fn verdicts_follow_the_stored_sample() {
        let mut reg = DeviceRegistry::new();
        let id = DeviceId::new(8, 0);
        reg.insert("/dev/sda".into(), id);

        let mut check = |c, in_progress| reg.update_and_check_idle(id, c, in_progress).map(|(v, _)| v);
        assert_eq!(check(counters(100, 50), 0), Some(IdleVerdict::FirstSample));
        assert_eq!(check(counters(100, 50), 0), Some(IdleVerdict::Idle));
        assert_eq!(check(counters(100, 50), 1), Some(IdleVerdict::Active));
        assert_eq!(check(counters(101, 50), 0), Some(IdleVerdict::Active));

        let (_, dev) = reg.update_and_check_idle(id, counters(101, 50), 0).unwrap();
        assert_eq!(dev.name, "/dev/sda");
        assert_eq!(reg.lookup(id).and_then(|d| d.last), Some(counters(101, 50)));
    }

    #[test]
    fn duplicate_id_keeps_last_name() {
        let mut reg = DeviceRegistry::new();
        let id = DeviceId::new(8, 0);
        reg.insert("/dev/sda".into(), id);
        reg.insert("/dev/disk/by-id/ata-foo".into(), id);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(id).map(|d| d.name.as_str()), Some("/dev/disk/by-id/ata-foo"));
    }

    #[test]
    fn devices_sorted_by_id() {
        let mut reg = DeviceRegistry::new();
        reg.insert("/dev/sdb".into(), DeviceId::new(8, 16));
        reg.insert("/dev/sda".into(), DeviceId::new(8, 0));
        let names: Vec<&str> = reg.devices().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["/dev/sda", "/dev/sdb"]);
    }

    #[test]
    fn missing_path_fails_to_resolve() {
        let err = resolve(Path::new("/nonexistent/spindownd-test-device")).unwrap_err();
        assert!(matches!(err, MonitorError::Resolution { .. }));
    }

    #[test]
    fn regular_file_is_not_a_block_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = resolve(file.path()).unwrap_err();
        match err {
            MonitorError::Resolution { detail, .. } => assert_eq!(detail, "not a block device"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn from_paths_stops_at_first_bad_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = DeviceRegistry::from_paths(&[file.path()]).unwrap_err();
        assert!(matches!(err, MonitorError::Resolution { .. }));
    }
}
