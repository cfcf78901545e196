use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::filter::LabelFilter;
use super::progress::{EntryOutcome, ProgressHandle};
use super::window::TimeWindow;
use crate::storage::{Bucket, EntryInfo, Record, RecordQuery, RecordStream};

/// Opens entries of one source bucket under a shared concurrency limit.
pub struct EntryReader<B: Bucket> {
    bucket: Arc<B>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    progress: ProgressHandle,
    window: TimeWindow,
    labels: LabelFilter,
    ttl: Duration,
    limit: Option<u64>,
}

impl<B: Bucket> Clone for EntryReader<B> {
    fn clone(&self) -> Self {
        Self {
            bucket: Arc::clone(&self.bucket),
            semaphore: Arc::clone(&self.semaphore),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            window: self.window,
            labels: self.labels.clone(),
            ttl: self.ttl,
            limit: self.limit,
        }
    }
}

impl<B: Bucket> EntryReader<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket: Arc<B>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
        progress: ProgressHandle,
        window: TimeWindow,
        labels: LabelFilter,
        ttl: Duration,
        limit: Option<u64>,
    ) -> Self {
        Self {
            bucket,
            semaphore,
            cancel,
            progress,
            window,
            labels,
            ttl,
            limit,
        }
    }

    /// Wait for a free slot and start the query for `entry`.
    ///
    /// Returns `None` when cancelled before a slot was free.
    pub async fn open(&self, entry: &EntryInfo) -> Result<Option<EntryStream>> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                Some(permit.context("entry semaphore closed")?)
            }
        };
        let Some(permit) = permit else {
            self.progress.finished(&entry.name, EntryOutcome::Stopped);
            return Ok(None);
        };

        let window = self.window.resolve_for(entry);
        self.progress.started(&entry.name, window.start, window.stop);
        let query = RecordQuery {
            start: window.start,
            stop: window.stop,
            include: self.labels.include.clone(),
            exclude: self.labels.exclude.clone(),
            ttl: self.ttl,
            limit: self.limit,
        };
        debug!(
            entry = %entry.name,
            start = query.start,
            stop = query.stop,
            "opening entry"
        );

        let records = match self.bucket.query(&entry.name, &query).await {
            Ok(records) => records,
            Err(err) => {
                self.progress.finished(&entry.name, EntryOutcome::Failed);
                return Err(err.context(format!("failed to query entry '{}'", entry.name)));
            }
        };

        Ok(Some(EntryStream {
            entry: entry.name.clone(),
            records,
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            limit: self.limit,
            yielded: 0,
            finished: false,
            _permit: permit,
        }))
    }
}

/// Records of one entry in timestamp order. Holds a concurrency slot until
/// dropped and reports its outcome exactly once.
pub struct EntryStream {
    entry: String,
    records: RecordStream,
    cancel: CancellationToken,
    progress: ProgressHandle,
    limit: Option<u64>,
    yielded: u64,
    finished: bool,
    _permit: OwnedSemaphorePermit,
}

impl EntryStream {
    /// Next record, or `None` once the entry is exhausted, the limit is
    /// reached or the job was cancelled.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.finish(EntryOutcome::Stopped);
            return Ok(None);
        }
        if self.limit.is_some_and(|limit| self.yielded >= limit) {
            self.finish(EntryOutcome::Completed);
            return Ok(None);
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            next = self.records.next() => Some(next),
        };
        let Some(next) = next else {
            self.finish(EntryOutcome::Stopped);
            return Ok(None);
        };

        match next {
            None => {
                self.finish(EntryOutcome::Completed);
                Ok(None)
            }
            Some(Err(err)) => {
                self.finish(EntryOutcome::Failed);
                Err(err.context(format!("failed to read entry '{}'", self.entry)))
            }
            Some(Ok(_)) if self.cancel.is_cancelled() => {
                self.finish(EntryOutcome::Stopped);
                Ok(None)
            }
            Some(Ok(record)) => {
                self.yielded += 1;
                self.progress
                    .record(&self.entry, record.timestamp, record.size);
                Ok(Some(record))
            }
        }
    }

    /// The sink already held the last record.
    pub fn skipped(&self) {
        self.progress.skipped(&self.entry);
    }

    fn finish(&mut self, outcome: EntryOutcome) {
        if !self.finished {
            self.finished = true;
            self.progress.finished(&self.entry, outcome);
        }
    }
}

impl Drop for EntryStream {
    fn drop(&mut self) {
        let outcome = if self.cancel.is_cancelled() {
            EntryOutcome::Stopped
        } else {
            EntryOutcome::Failed
        };
        self.finish(outcome);
    }
}
