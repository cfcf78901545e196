//! Bulk transfer of entries from a source bucket into a sink.
//!
//! Every selected entry runs as its own task; a semaphore sized to the job's
//! parallelism bounds how many of them talk to the server at once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::storage::{Bucket, EntryInfo, Storage};

pub mod filter;
pub mod path;
pub mod progress;
pub mod reader;
pub mod sink;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

use filter::{EntrySelector, LabelFilter};
use path::BucketPath;
use progress::ProgressHandle;
use reader::EntryReader;
use sink::{BucketSink, FolderSink, RecordSink, WriteOutcome};
use window::TimeWindow;

/// What to read from the source bucket. The destination is given by the sink.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source: BucketPath,
    pub window: TimeWindow,
    pub entries: EntrySelector,
    pub labels: LabelFilter,
    pub parallel: usize,
    pub timeout: Duration,
    pub limit: Option<u64>,
}

impl TransferJob {
    /// Lifetime of a server-side query: every active entry gets the full
    /// request timeout.
    pub fn ttl(&self) -> Duration {
        let parallel = u32::try_from(self.parallel).unwrap_or(u32::MAX);
        self.timeout.saturating_mul(parallel)
    }
}

/// Copy every selected entry of `job.source` into `sink`.
pub async fn export_to_folder<S: Storage>(
    source: &S,
    job: &TransferJob,
    sink: FolderSink,
    cancel: &CancellationToken,
    progress: ProgressHandle,
) -> Result<()> {
    let bucket = source
        .get_bucket(&job.source.bucket)
        .await
        .with_context(|| format!("failed to open bucket '{}'", job.source))?;
    info!(
        source = %job.source,
        dest = %sink.root().display(),
        "exporting to folder"
    );
    copy_entries(bucket, sink, job, cancel, progress).await
}

/// Copy every selected entry of `job.source` into `dest_bucket`, creating it
/// with the source settings when it is missing.
pub async fn export_to_bucket<S: Storage, D: Storage>(
    source: &S,
    dest: &D,
    dest_bucket: &str,
    job: &TransferJob,
    cancel: &CancellationToken,
    progress: ProgressHandle,
) -> Result<()> {
    let bucket = source
        .get_bucket(&job.source.bucket)
        .await
        .with_context(|| format!("failed to open bucket '{}'", job.source))?;
    let settings = bucket.settings().await?;
    let dest = dest
        .create_bucket(dest_bucket, &settings, true)
        .await
        .with_context(|| format!("failed to prepare bucket '{dest_bucket}'"))?;
    info!(source = %job.source, dest = dest.name(), "exporting to bucket");
    copy_entries(bucket, BucketSink::new(dest), job, cancel, progress).await
}

async fn copy_entries<B: Bucket, K: RecordSink>(
    bucket: B,
    sink: K,
    job: &TransferJob,
    cancel: &CancellationToken,
    progress: ProgressHandle,
) -> Result<()> {
    let listed = bucket
        .list_entries()
        .await
        .with_context(|| format!("failed to list entries of '{}'", bucket.name()))?;
    let entries = job.entries.filter(listed);
    if entries.is_empty() {
        info!(bucket = bucket.name(), "no entries to transfer");
        return Ok(());
    }
    debug!(
        count = entries.len(),
        parallel = job.parallel,
        ttl_secs = job.ttl().as_secs(),
        "starting entry tasks"
    );

    // Tripped by the first fatal error so the other entries stop early.
    let cancel = cancel.child_token();
    let reader = EntryReader::new(
        Arc::new(bucket),
        Arc::new(Semaphore::new(job.parallel)),
        cancel.clone(),
        progress,
        job.window,
        job.labels.clone(),
        job.ttl(),
        job.limit,
    );
    let sink = Arc::new(sink);

    let mut join_set = JoinSet::new();
    for entry in entries {
        let reader = reader.clone();
        let sink = Arc::clone(&sink);
        join_set.spawn(async move { copy_entry(&reader, sink.as_ref(), &entry).await });
    }
    drop(reader);

    let mut first_error = None;
    while let Some(joined) = join_set.join_next().await {
        let result = joined.context("entry task panicked").and_then(|result| result);
        if let Err(err) = result {
            if first_error.is_none() {
                cancel.cancel();
                first_error = Some(err);
            } else {
                debug!(error = %format!("{err:#}"), "another entry failed");
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn copy_entry<B: Bucket, K: RecordSink>(
    reader: &EntryReader<B>,
    sink: &K,
    entry: &EntryInfo,
) -> Result<()> {
    let Some(mut stream) = reader.open(entry).await? else {
        return Ok(());
    };
    while let Some(record) = stream.next().await? {
        if sink.write(&entry.name, record).await? == WriteOutcome::Skipped {
            stream.skipped();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::progress::{EntryOutcome, ProgressReporter, TransferSummary};
    use super::testing::{MemoryBucket, MemoryStorage};
    use super::*;
    use crate::error::error_line;
    use crate::storage::{BucketSettings, Labels};

    fn job(parallel: usize) -> TransferJob {
        TransferJob {
            source: "local/src".parse().unwrap(),
            window: TimeWindow::default(),
            entries: EntrySelector::default(),
            labels: LabelFilter::default(),
            parallel,
            timeout: Duration::from_secs(5),
            limit: None,
        }
    }

    fn source() -> MemoryBucket {
        let bucket = MemoryBucket::new("src");
        bucket.insert_typed(
            "entry-1",
            1_000_000_000,
            Some("image/png"),
            "Hey",
            Labels::from([("camera".to_string(), "front".to_string())]),
        );
        bucket.insert_typed(
            "entry-1",
            5_000_000_000,
            Some("image/png"),
            "Bye",
            Labels::new(),
        );
        bucket.insert("entry-2", 2_000_000_000, "Hmm", Labels::new());
        bucket
    }

    async fn to_folder(
        storage: &MemoryStorage,
        job: &TransferJob,
        root: &std::path::Path,
        cancel: &CancellationToken,
    ) -> (Result<()>, TransferSummary) {
        let (progress, reporter) = ProgressReporter::new(false).spawn();
        let sink = FolderSink::new(root, None, false);
        let result = export_to_folder(storage, job, sink, cancel, progress).await;
        (result, reporter.finish().await.unwrap())
    }

    async fn to_bucket(
        source: &MemoryStorage,
        dest: &MemoryStorage,
        job: &TransferJob,
    ) -> (Result<()>, TransferSummary) {
        let (progress, reporter) = ProgressReporter::new(false).spawn();
        let cancel = CancellationToken::new();
        let result = export_to_bucket(source, dest, "dest", job, &cancel, progress).await;
        (result, reporter.finish().await.unwrap())
    }

    #[test]
    fn ttl_scales_with_parallelism() {
        let mut job = job(2);
        job.timeout = Duration::from_secs(3);
        assert_eq!(job.ttl(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn exports_every_entry_into_folders() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = MemoryStorage::default().with_bucket(source());

        let (result, summary) =
            to_folder(&storage, &job(10), dir.path(), &CancellationToken::new()).await;
        result?;

        assert_eq!(std::fs::read(dir.path().join("entry-1/1000000000.png"))?, b"Hey");
        assert_eq!(std::fs::read(dir.path().join("entry-1/5000000000.png"))?, b"Bye");
        assert_eq!(std::fs::read(dir.path().join("entry-2/2000000000.bin"))?, b"Hmm");
        assert_eq!(summary.records(), 3);
        assert_eq!(summary.bytes(), 9);
        assert!(!summary.interrupted());
        Ok(())
    }

    #[tokio::test]
    async fn queries_carry_window_labels_and_ttl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket = source();
        let storage = MemoryStorage::default().with_bucket(bucket.clone());

        let mut job = job(2);
        job.timeout = Duration::from_secs(3);
        job.entries = EntrySelector::parse("entry-1")?;
        job.window = TimeWindow::parse(
            Some("2022-01-02T00:00:01.100300+02:00"),
            Some("2022-02-01T00:00:00+02:00"),
        )?;
        job.labels = LabelFilter::parse("label1=value1,label2=value2", "label3=value3")?;
        job.limit = Some(10);

        let (result, _) = to_folder(&storage, &job, dir.path(), &CancellationToken::new()).await;
        result?;

        let queries = bucket.queries();
        assert_eq!(queries.len(), 1);
        let (entry, query) = &queries[0];
        assert_eq!(entry, "entry-1");
        assert_eq!(query.start, 1_641_074_401_100_300);
        assert_eq!(query.stop, 1_643_666_400_000_000);
        assert_eq!(query.include.len(), 2);
        assert_eq!(query.exclude.get("label3").map(String::as_str), Some("value3"));
        assert_eq!(query.ttl, Duration::from_secs(6));
        assert_eq!(query.limit, Some(10));
        Ok(())
    }

    #[tokio::test]
    async fn default_window_is_each_entry_range() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket = source();
        let storage = MemoryStorage::default().with_bucket(bucket.clone());

        let (result, _) = to_folder(&storage, &job(1), dir.path(), &CancellationToken::new()).await;
        result?;

        let mut windows: Vec<(String, i64, i64)> = bucket
            .queries()
            .into_iter()
            .map(|(entry, query)| (entry, query.start, query.stop))
            .collect();
        windows.sort();
        assert_eq!(
            windows,
            vec![
                ("entry-1".to_string(), 1_000_000_000, 5_000_000_000),
                ("entry-2".to_string(), 2_000_000_000, 2_000_000_000),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn parallelism_bounds_open_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket = MemoryBucket::new("src");
        for idx in 0..5 {
            let entry = format!("entry-{idx}");
            for ts in 1..=3 {
                bucket.insert(&entry, ts, "x", Labels::new());
            }
        }
        bucket.delay_records(Duration::from_millis(5));
        let storage = MemoryStorage::default().with_bucket(bucket.clone());

        let (result, summary) =
            to_folder(&storage, &job(2), dir.path(), &CancellationToken::new()).await;
        result?;

        assert_eq!(bucket.peak_in_flight(), 2);
        assert_eq!(summary.entries.len(), 5);
        assert_eq!(summary.records(), 15);
        Ok(())
    }

    #[tokio::test]
    async fn empty_selection_is_a_no_op() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket = source();
        let storage = MemoryStorage::default().with_bucket(bucket.clone());
        let mut job = job(2);
        job.entries = EntrySelector::parse("missing-*")?;

        let (result, summary) =
            to_folder(&storage, &job, dir.path(), &CancellationToken::new()).await;
        result?;
        assert!(bucket.queries().is_empty());
        assert!(summary.entries.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_bucket_is_a_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::default();
        let (result, _) = to_folder(&storage, &job(2), dir.path(), &CancellationToken::new()).await;
        let line = error_line(&result.unwrap_err());
        assert!(line.starts_with("[RemoteRequestError] failed to open bucket 'local/src'"));
        assert!(line.contains("Status 404"));
    }

    #[tokio::test]
    async fn cancelled_job_stops_every_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = MemoryStorage::default().with_bucket(source());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, summary) = to_folder(&storage, &job(2), dir.path(), &cancel).await;
        result?;
        assert!(summary.interrupted());
        assert_eq!(summary.records(), 0);
        assert!(!dir.path().join("entry-1").exists());
        Ok(())
    }

    #[tokio::test]
    async fn first_failure_stops_siblings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket = MemoryBucket::new("src");
        bucket.insert("entry-1", 1, "x", Labels::new());
        for ts in 1..=50 {
            bucket.insert("entry-2", ts, "x", Labels::new());
        }
        bucket.fail_query("entry-1", 500);
        bucket.delay_records(Duration::from_millis(10));
        let storage = MemoryStorage::default().with_bucket(bucket);

        let (result, summary) =
            to_folder(&storage, &job(2), dir.path(), &CancellationToken::new()).await;
        let line = error_line(&result.unwrap_err());
        assert!(line.starts_with("[RemoteRequestError] failed to query entry 'entry-1'"));

        let outcome = |name: &str| {
            summary
                .entries
                .iter()
                .find(|entry| entry.entry == name)
                .map(|entry| entry.outcome)
        };
        assert_eq!(outcome("entry-1"), Some(EntryOutcome::Failed));
        assert_eq!(outcome("entry-2"), Some(EntryOutcome::Stopped));
        let written = std::fs::read_dir(dir.path().join("entry-2"))
            .map(|dir| dir.count())
            .unwrap_or(0);
        assert!(written < 50);
        Ok(())
    }

    #[tokio::test]
    async fn bucket_export_creates_destination_from_source_settings() -> Result<()> {
        let mut settings = Map::new();
        settings.insert("quota_type".to_string(), json!("FIFO"));
        let settings = BucketSettings(settings);
        let source = MemoryStorage::default().with_bucket(source().with_settings(settings.clone()));
        let dest = MemoryStorage::default();

        let (result, summary) = to_bucket(&source, &dest, &job(2)).await;
        result?;

        let copied = dest.bucket("dest").expect("destination bucket");
        assert_eq!(copied.settings().await?, settings);
        let records = copied.records("entry-1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 1_000_000_000);
        assert_eq!(records[0].content_type.as_deref(), Some("image/png"));
        assert_eq!(records[0].labels.get("camera").map(String::as_str), Some("front"));
        assert_eq!(&records[1].data[..], b"Bye");
        assert_eq!(copied.records("entry-2").len(), 1);
        assert_eq!(summary.records(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn records_already_in_destination_are_skipped() -> Result<()> {
        let source = MemoryStorage::default().with_bucket(source());
        let existing = MemoryBucket::new("dest");
        existing.insert("entry-1", 1_000_000_000, "old", Labels::new());
        let dest = MemoryStorage::default().with_bucket(existing.clone());

        let (result, summary) = to_bucket(&source, &dest, &job(2)).await;
        result?;

        let entry_1 = summary
            .entries
            .iter()
            .find(|entry| entry.entry == "entry-1")
            .expect("entry-1 summary");
        assert_eq!(entry_1.records, 2);
        assert_eq!(entry_1.skipped, 1);
        assert_eq!(entry_1.outcome, EntryOutcome::Completed);
        assert_eq!(&existing.records("entry-1")[0].data[..], b"old");

        let (result, summary) = to_bucket(&source, &dest, &job(2)).await;
        result?;
        assert_eq!(summary.records(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn other_write_errors_are_fatal() {
        let source = MemoryStorage::default().with_bucket(source());
        let broken = MemoryBucket::new("dest");
        broken.fail_writes(500);
        let dest = MemoryStorage::default().with_bucket(broken);

        let (result, _) = to_bucket(&source, &dest, &job(1)).await;
        let line = error_line(&result.unwrap_err());
        assert!(line.starts_with("[RemoteRequestError] failed to write record"));
        assert!(line.contains("Status 500: write failed"));
    }
}
