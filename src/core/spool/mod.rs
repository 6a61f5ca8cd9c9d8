//! Durable queue of undelivered messages.
//!
//! ```text
//! append ──► spool.jsonl (one QueueRecord per line, oldest first)
//!               │
//!   flush ──────┤ first `max_records` lines, in order:
//!               │   malformed  → dropped
//!               │   delivered  → removed
//!               │   refused    → kept verbatim
//!               │   unreachable→ kept verbatim, pass ends
//!               │ remaining lines untouched
//!               ▼
//!            rewritten through `<path>.tmp` + rename, or deleted when empty
//! ```
//!
//! After every successful append the [`RetentionPolicy`] sees the file size
//! and may ask for the file to be cut down to its most recent records.
//! Flushes never trim: they only remove lines or keep them, so they cannot
//! grow the file beyond what the last append already allowed.
//!
//! Access is serialized through [`Spool`], a cloneable handle around a
//! `tokio::sync::Mutex`. A flush holds the lock for its whole pass; since an
//! unreachable sink ends the pass, a dead link costs appends at most one
//! failed delivery of waiting.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};

pub use self::{
    error::{RecordError, SpoolError},
    record::QueueRecord,
    retention::{KeepAll, RetentionPolicy, TailTrim},
};
use crate::config::agent::SpoolConfig;

pub mod error;
pub mod record;
pub mod retention;

/// Sink verdict for one record offered during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Delivered; the record may be forgotten.
    Delivered,
    /// This record was not taken; later ones may still be.
    Refused,
    /// Nothing will get through right now. Ends the pass.
    Unreachable,
}

/// Receives spooled records during a flush.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: &QueueRecord) -> Replay;
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Delivered and removed.
    pub sent: usize,
    /// Refused by the sink, kept for the next flush.
    pub retained: usize,
    /// Unparseable, dropped.
    pub malformed: usize,
    /// Not attempted: beyond `max_records` or after a refusal.
    pub deferred: usize,
}

impl FlushReport {
    /// Records still in the spool after the pass.
    pub fn remaining(&self) -> usize {
        self.retained + self.deferred
    }
}

/// Append-only JSON-lines log with bounded retention.
#[derive(Debug)]
pub struct DurableQueue {
    path: PathBuf,
    tmp_path: PathBuf,
    policy: Box<dyn RetentionPolicy>,
}

impl DurableQueue {
    /// Prepares a queue at `path`, creating its directory. The file itself
    /// is created by the first append.
    pub async fn open(
        path: impl Into<PathBuf>,
        policy: impl RetentionPolicy + 'static,
    ) -> Result<Self, SpoolError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SpoolError::Open {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");

        Ok(DurableQueue {
            path,
            tmp_path: PathBuf::from(tmp_path),
            policy: Box::new(policy),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a line, then applies the retention policy.
    ///
    /// An error means the record was not stored. A failed trim is logged
    /// and does not affect the result: the record is on disk.
    pub async fn append(&mut self, record: &QueueRecord) -> Result<(), SpoolError> {
        let mut line = record.to_line()?;
        line.push('\n');

        let write_err = |source| SpoolError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        let size = file.metadata().await.map_err(write_err)?.len();
        drop(file);

        if let Some(keep) = self.policy.trim_to(size) {
            if let Err(e) = self.trim(keep, size).await {
                warn!("Spool trim failed: {}", e);
            }
        }
        Ok(())
    }

    /// Offers up to `max_records` records, oldest first, to `sink`.
    ///
    /// Delivered and malformed records are removed; refused ones and those
    /// not attempted stay, in their original order and byte for byte. The
    /// pass ends early when the sink reports [`Replay::Unreachable`].
    pub async fn flush<S>(&mut self, sink: &S, max_records: usize) -> Result<FlushReport, SpoolError>
    where
        S: RecordSink + ?Sized,
    {
        let mut report = FlushReport::default();
        let Some(content) = self.read().await? else {
            return Ok(report);
        };

        let lines = split_lines(&content);
        if lines.is_empty() {
            self.remove().await?;
            return Ok(report);
        }

        let mut cutoff = lines.len().min(max_records);
        let mut kept: Vec<&[u8]> = Vec::with_capacity(lines.len());

        for (index, line) in lines[..cutoff].iter().enumerate() {
            let parsed = std::str::from_utf8(line)
                .map_err(|_| "not UTF-8".to_string())
                .and_then(|text| QueueRecord::parse(text).map_err(|e| e.to_string()));

            match parsed {
                Ok(record) => match sink.deliver(&record).await {
                    Replay::Delivered => report.sent += 1,
                    Replay::Refused => {
                        debug!("Spooled record for '{}' kept for the next flush", record.topic);
                        report.retained += 1;
                        kept.push(line);
                    }
                    Replay::Unreachable => {
                        debug!("Sink unreachable at '{}', flush stops here", record.topic);
                        report.retained += 1;
                        kept.push(line);
                        cutoff = index + 1;
                        break;
                    }
                },
                Err(reason) => {
                    warn!("Dropping malformed spool record: {}", reason);
                    report.malformed += 1;
                }
            }
        }

        report.deferred = lines.len() - cutoff;
        kept.extend_from_slice(&lines[cutoff..]);

        if report.sent == 0 && report.malformed == 0 {
            return Ok(report);
        }
        if kept.is_empty() {
            self.remove().await?;
        } else {
            self.rewrite(&kept).await?;
        }
        Ok(report)
    }

    /// Number of non-blank lines in the spool.
    pub async fn len(&self) -> Result<usize, SpoolError> {
        Ok(self
            .read()
            .await?
            .map(|content| split_lines(&content).len())
            .unwrap_or(0))
    }

    /// Parsed records in spool order; malformed lines are skipped.
    #[cfg(test)]
    pub async fn records(&self) -> Result<Vec<QueueRecord>, SpoolError> {
        let Some(content) = self.read().await? else {
            return Ok(Vec::new());
        };
        Ok(split_lines(&content)
            .into_iter()
            .filter_map(|line| std::str::from_utf8(line).ok())
            .filter_map(|text| QueueRecord::parse(text).ok())
            .collect())
    }

    async fn trim(&self, keep: usize, size: u64) -> Result<(), SpoolError> {
        let Some(content) = self.read().await? else {
            return Ok(());
        };
        let lines = split_lines(&content);
        let dropped = lines.len().saturating_sub(keep);
        if dropped == 0 {
            return Ok(());
        }

        self.rewrite(&lines[dropped..]).await?;
        warn!(
            "Spool reached {} bytes; dropped {} oldest records, kept {}",
            size,
            dropped,
            lines.len() - dropped
        );
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, SpoolError> {
        match fs::read(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SpoolError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn rewrite(&self, lines: &[&[u8]]) -> Result<(), SpoolError> {
        let rewrite_err = |source| SpoolError::Rewrite {
            path: self.path.clone(),
            source,
        };

        let mut buf = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buf.extend_from_slice(line);
            buf.push(b'\n');
        }

        let mut file = fs::File::create(&self.tmp_path).await.map_err(rewrite_err)?;
        file.write_all(&buf).await.map_err(rewrite_err)?;
        file.sync_all().await.map_err(rewrite_err)?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(rewrite_err)
    }

    async fn remove(&self) -> Result<(), SpoolError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SpoolError::Rewrite {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Splits on `\n`, skipping blank lines.
fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    content
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .collect()
}

/// Shared handle to a [`DurableQueue`]; clones use the same file.
#[derive(Debug, Clone)]
pub struct Spool {
    queue: Arc<Mutex<DurableQueue>>,
}

impl Spool {
    pub fn new(queue: DurableQueue) -> Self {
        Spool {
            queue: Arc::new(Mutex::new(queue)),
        }
    }

    /// Opens the spool described by the `[spool]` section with tail-trim
    /// retention.
    pub async fn open(config: &SpoolConfig) -> Result<Self, SpoolError> {
        let policy = TailTrim::new(config.max_bytes, config.keep_records);
        let queue = DurableQueue::open(&config.path, policy).await?;
        info!(
            "Spool at {} (trim above {} bytes to {} records)",
            queue.path().display(),
            config.max_bytes,
            config.keep_records
        );
        Ok(Spool::new(queue))
    }

    pub async fn append(&self, record: &QueueRecord) -> Result<(), SpoolError> {
        self.queue.lock().await.append(record).await
    }

    pub async fn flush<S>(&self, sink: &S, max_records: usize) -> Result<FlushReport, SpoolError>
    where
        S: RecordSink + ?Sized,
    {
        self.queue.lock().await.flush(sink, max_records).await
    }

    pub async fn len(&self) -> Result<usize, SpoolError> {
        self.queue.lock().await.len().await
    }

    #[cfg(test)]
    pub async fn records(&self) -> Result<Vec<QueueRecord>, SpoolError> {
        self.queue.lock().await.records().await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex as StdMutex};

    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;

    /// Accepts every record except those whose payload is listed.
    #[derive(Default)]
    struct ScriptedSink {
        refuse: HashSet<String>,
        unreachable_at: Option<String>,
        offered: StdMutex<Vec<String>>,
    }

    impl ScriptedSink {
        fn refusing(payloads: &[&str]) -> Self {
            ScriptedSink {
                refuse: payloads.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }
        }

        fn unreachable_at(payload: &str) -> Self {
            ScriptedSink {
                unreachable_at: Some(payload.to_string()),
                ..Default::default()
            }
        }

        fn offered(&self) -> Vec<String> {
            self.offered.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RecordSink for ScriptedSink {
        async fn deliver(&self, record: &QueueRecord) -> Replay {
            self.offered.lock().unwrap().push(record.payload.clone());
            if self.unreachable_at.as_deref() == Some(record.payload.as_str()) {
                Replay::Unreachable
            } else if self.refuse.contains(&record.payload) {
                Replay::Refused
            } else {
                Replay::Delivered
            }
        }
    }

    async fn queue(dir: &TempDir) -> DurableQueue {
        DurableQueue::open(dir.path().join("spool/spool.jsonl"), KeepAll)
            .await
            .unwrap()
    }

    async fn fill(queue: &mut DurableQueue, payloads: &[&str]) {
        for payload in payloads {
            queue
                .append(&QueueRecord::new("home/iot/cam/telemetry", *payload, 1, false))
                .await
                .unwrap();
        }
    }

    async fn payloads(queue: &DurableQueue) -> Vec<String> {
        queue
            .records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.payload)
            .collect()
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).await;
        assert!(dir.path().join("spool").is_dir());
        assert!(!queue.path().exists());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_flush_drains_in_enqueue_order() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a", "b", "c", "d"]).await;

        let sink = ScriptedSink::default();
        let report = queue.flush(&sink, usize::MAX).await.unwrap();

        assert_eq!(sink.offered(), vec!["a", "b", "c", "d"]);
        assert_eq!(report.sent, 4);
        assert_eq!(report.remaining(), 0);
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn test_refused_record_is_the_only_one_retained() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a", "b", "c", "d", "e"]).await;

        let sink = ScriptedSink::refusing(&["b"]);
        let report = queue.flush(&sink, 3).await.unwrap();

        assert_eq!(
            report,
            FlushReport {
                sent: 2,
                retained: 1,
                malformed: 0,
                deferred: 2
            }
        );
        assert_eq!(sink.offered(), vec!["a", "b", "c"]);
        assert_eq!(payloads(&queue).await, vec!["b", "d", "e"]);
    }

    #[tokio::test]
    async fn test_unreachable_sink_ends_the_pass() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a", "b", "c", "d", "e"]).await;

        let sink = ScriptedSink::unreachable_at("b");
        let report = queue.flush(&sink, 4).await.unwrap();

        assert_eq!(
            report,
            FlushReport {
                sent: 1,
                retained: 1,
                malformed: 0,
                deferred: 3
            }
        );
        assert_eq!(sink.offered(), vec!["a", "b"]);
        assert_eq!(payloads(&queue).await, vec!["b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_lines_after_an_unreachable_sink_are_untouched() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a", "b"]).await;
        let mut content = std::fs::read(queue.path()).unwrap();
        content.extend_from_slice(b"{not json\n");
        std::fs::write(queue.path(), &content).unwrap();
        fill(&mut queue, &["c"]).await;

        let sink = ScriptedSink::unreachable_at("a");
        let before = std::fs::read(queue.path()).unwrap();
        let report = queue.flush(&sink, 100).await.unwrap();

        assert_eq!(report.sent, 0);
        assert_eq!(report.malformed, 0);
        assert_eq!(report.deferred, 3);
        assert_eq!(sink.offered(), vec!["a"]);
        assert_eq!(std::fs::read(queue.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_bounded_flush_scenario() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["T1", "T2", "T3"]).await;

        let sink = ScriptedSink::refusing(&["T2"]);
        let report = queue.flush(&sink, 2).await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(sink.offered(), vec!["T1", "T2"]);
        assert_eq!(payloads(&queue).await, vec!["T2", "T3"]);

        // Next pass starts with the retained record.
        let report = queue.flush(&ScriptedSink::default(), 2).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retained_lines_are_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        let odd_line = r#"{ "payload": "keep",  "topic": "t", "ts": "2026-03-01T10:00:00+02:00" }"#;
        fill(&mut queue, &["sent"]).await;
        let mut content = std::fs::read_to_string(queue.path()).unwrap();
        content.push_str(odd_line);
        content.push('\n');
        std::fs::write(queue.path(), content).unwrap();

        let report = queue
            .flush(&ScriptedSink::refusing(&["keep"]), 10)
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        let content = std::fs::read_to_string(queue.path()).unwrap();
        assert_eq!(content, format!("{odd_line}\n"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_lines_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a"]).await;
        let mut content = std::fs::read(queue.path()).unwrap();
        content.extend_from_slice(b"{not json\n");
        content.extend_from_slice(&[0xff, 0xfe, b'\n']);
        content.extend_from_slice(b"{\"topic\":\"t\",\"payload\":\"p\",\"qos\":9}\n");
        std::fs::write(queue.path(), content).unwrap();
        fill(&mut queue, &["b"]).await;

        let sink = ScriptedSink::default();
        let report = queue.flush(&sink, 100).await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.malformed, 3);
        assert_eq!(sink.offered(), vec!["a", "b"]);
        assert!(!queue.path().exists());
        assert!(logs_contain("Dropping malformed spool record"));
    }

    #[tokio::test]
    async fn test_missing_and_empty_files() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;

        let report = queue.flush(&ScriptedSink::default(), 10).await.unwrap();
        assert_eq!(report, FlushReport::default());

        std::fs::write(queue.path(), "\n\n").unwrap();
        let report = queue.flush(&ScriptedSink::default(), 10).await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn test_zero_budget_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let mut queue = queue(&dir).await;
        fill(&mut queue, &["a", "b"]).await;
        let before = std::fs::read(queue.path()).unwrap();

        let sink = ScriptedSink::default();
        let report = queue.flush(&sink, 0).await.unwrap();

        assert_eq!(report.deferred, 2);
        assert!(sink.offered().is_empty());
        assert_eq!(std::fs::read(queue.path()).unwrap(), before);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_trim_keeps_most_recent_records() {
        let dir = TempDir::new().unwrap();
        let mut queue = DurableQueue::open(dir.path().join("spool.jsonl"), TailTrim::new(250, 3))
            .await
            .unwrap();

        let names: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        fill(&mut queue, &names).await;

        assert_eq!(payloads(&queue).await, vec!["r7", "r8", "r9"]);
        assert!(logs_contain("dropped"));
    }

    #[tokio::test]
    async fn test_below_threshold_nothing_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let mut queue =
            DurableQueue::open(dir.path().join("spool.jsonl"), TailTrim::new(1_000_000, 2))
                .await
                .unwrap();
        fill(&mut queue, &["a", "b", "c", "d"]).await;
        assert_eq!(queue.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_append_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        // The spool path is a directory, so opening it for append fails.
        let mut queue = DurableQueue::open(dir.path(), KeepAll).await.unwrap();
        let err = queue
            .append(&QueueRecord::new("t", "p", 1, false))
            .await
            .unwrap_err();
        assert!(matches!(err, SpoolError::Write { .. }));
    }

    #[tokio::test]
    async fn test_spool_handle_serializes_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(queue(&dir).await);

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let spool = spool.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        let record = QueueRecord::new("t", format!("{task}-{i}"), 1, false);
                        spool.append(&record).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(spool.len().await.unwrap(), 200);
        let report = spool.flush(&ScriptedSink::default(), 500).await.unwrap();
        assert_eq!(report.sent, 200);
        assert_eq!(spool.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let dir = TempDir::new().unwrap();
        let config = SpoolConfig {
            path: dir.path().join("iot_spool/spool.jsonl"),
            ..Default::default()
        };
        let spool = Spool::open(&config).await.unwrap();
        spool
            .append(&QueueRecord::new("t", "p", 1, false))
            .await
            .unwrap();
        assert_eq!(spool.records().await.unwrap().len(), 1);
    }
}
