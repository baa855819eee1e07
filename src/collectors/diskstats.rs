use crate::error::{MonitorError, Result};
use crate::models::device::{DeviceId, OperationCounters};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const DISKSTATS_PATH: &str = "/proc/diskstats";

// Token positions inside one /proc/diskstats line, see
// Documentation/admin-guide/iostats.rst:
//
//   8  0  sda  446216 784926 9550688 4382310 424847 312726 5922052 19310380 0 3376340 23705160
//   maj min name reads  .      .       .     writes   .      .       .   inflight  .     .
const FIELD_MAJOR:       usize = 0;
const FIELD_MINOR:       usize = 1;
const FIELD_NAME:        usize = 2;
const FIELD_READS:       usize = 3;
const FIELD_WRITES:      usize = 7;
const FIELD_IN_PROGRESS: usize = 11;

/// Every line carries at least this many tokens; newer kernels append more.
pub const MIN_FIELDS: usize = 14;

/// The counters of one /proc/diskstats line that idle detection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskstatRecord {
    pub id:          DeviceId,
    pub name:        String,
    pub counters:    OperationCounters,
    pub in_progress: u64,
}

/// Parses one line. Anything short of [`MIN_FIELDS`] tokens, or a used
/// field that is not an unsigned integer, is rejected.
pub fn parse_line(line_no: usize, line: &str) -> Result<DiskstatRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return Err(MonitorError::FeedParse {
            line_no,
            line:   line.to_string(),
            detail: format!("expected at least {} fields, found {}", MIN_FIELDS, fields.len()),
        });
    }

    let num = |idx: usize, what: &str| -> Result<u64> {
        fields[idx].parse::<u64>().map_err(|e| MonitorError::FeedParse {
            line_no,
            line:   line.to_string(),
            detail: format!("field {} ({}) {:?}: {}", idx + 1, what, fields[idx], e),
        })
    };

    let major = num(FIELD_MAJOR, "major")?;
    let minor = num(FIELD_MINOR, "minor")?;
    Ok(DiskstatRecord {
        id:   DeviceId::new(major, minor),
        name: fields[FIELD_NAME].to_string(),
        counters: OperationCounters {
            reads:  num(FIELD_READS, "reads completed")?,
            writes: num(FIELD_WRITES, "writes completed")?,
        },
        in_progress: num(FIELD_IN_PROGRESS, "I/Os in progress")?,
    })
}

/// A counters feed that is re-read from offset zero on every sample.
///
/// The handle is opened once and never reopened; a failed rewind is an
/// error rather than a reason to open the path again.
pub struct DiskstatsFeed<R> {
    path:   String,
    reader: R,
}

impl DiskstatsFeed<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| MonitorError::FeedIo {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(path.display().to_string(), file))
    }
}

impl<R: Read + Seek> DiskstatsFeed<R> {
    pub fn new(path: impl Into<String>, reader: R) -> Self {
        Self { path: path.into(), reader }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewinds and walks the whole feed, handing each parsed record to
    /// `visit` in file order. Stops at the first bad line or visitor error.
    pub fn for_each_record<F>(&mut self, mut visit: F) -> Result<usize>
    where
        F: FnMut(DiskstatRecord) -> Result<()>,
    {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|source| MonitorError::FeedIo { path: self.path.clone(), source })?;

        // Raw bytes, so a line that isn't UTF-8 is reported as a bad record
        // with its line number rather than as a read failure.
        let mut count = 0;
        let mut buf = Vec::new();
        let mut reader = BufReader::new(&mut self.reader);
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| MonitorError::FeedIo { path: self.path.clone(), source })?;
            if n == 0 {
                return Ok(count);
            }

            let line_no = count + 1;
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = std::str::from_utf8(raw).map_err(|e| MonitorError::FeedParse {
                line_no,
                line:   String::from_utf8_lossy(raw).into_owned(),
                detail: format!("not valid UTF-8: {}", e),
            })?;
            visit(parse_line(line_no, line)?)?;
            count += 1;
        }
    }

    /// Rewinds and parses the whole feed into a vector.
    pub fn read_all(&mut self) -> Result<Vec<DiskstatRecord>> {
        let mut out = Vec::new();
        self.for_each_record(|rec| {
            out.push(rec);
            Ok(())
        })?;
        Ok(out)
    }
}

/// Default feed location as an owned path.
pub fn default_path() -> PathBuf {
    PathBuf::from(DISKSTATS_PATH)
}
