use std::fmt;

/// Decides, after each append, whether the spool must shed old records.
pub trait RetentionPolicy: Send + Sync + fmt::Debug {
    /// Given the spool size in bytes, returns how many of the most recent
    /// records to keep, or `None` to leave the file alone.
    fn trim_to(&self, file_size: u64) -> Option<usize>;
}

/// Once the file exceeds `max_bytes`, keep only the last `keep_records`.
///
/// Lossy: a long outage drops the oldest backlog instead of filling the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailTrim {
    pub max_bytes: u64,
    pub keep_records: usize,
}

impl TailTrim {
    pub const DEFAULT_KEEP_RECORDS: usize = 5000;

    pub fn new(max_bytes: u64, keep_records: usize) -> Self {
        TailTrim {
            max_bytes,
            keep_records,
        }
    }
}

impl RetentionPolicy for TailTrim {
    fn trim_to(&self, file_size: u64) -> Option<usize> {
        (file_size > self.max_bytes).then_some(self.keep_records)
    }
}

/// Never trims.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl RetentionPolicy for KeepAll {
    fn trim_to(&self, _file_size: u64) -> Option<usize> {
        None
    }
}
