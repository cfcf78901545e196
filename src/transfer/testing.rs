//! In-memory storage used by the transfer tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

use crate::error::CliError;
use crate::storage::{
    Bucket, BucketSettings, EntryInfo, Labels, Record, RecordQuery, RecordStream, Storage,
};

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub timestamp: i64,
    pub content_type: Option<String>,
    pub labels: Labels,
    pub data: Bytes,
}

impl StoredRecord {
    fn to_record(&self) -> Record {
        let data = self.data.clone();
        Record::new(
            self.timestamp,
            data.len() as u64,
            self.content_type.clone(),
            self.labels.clone(),
            stream::once(async move { Ok(data) }).boxed(),
        )
    }
}

#[derive(Default)]
struct BucketState {
    settings: BucketSettings,
    entries: BTreeMap<String, Vec<StoredRecord>>,
    queries: Vec<(String, RecordQuery)>,
    failing_queries: HashMap<String, u16>,
    failing_writes: Option<u16>,
    record_delay: Duration,
    in_flight: usize,
    peak_in_flight: usize,
}

#[derive(Clone)]
pub struct MemoryBucket {
    name: String,
    state: Arc<Mutex<BucketState>>,
}

impl MemoryBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap()
    }

    pub fn with_settings(self, settings: BucketSettings) -> Self {
        self.lock().settings = settings;
        self
    }

    pub fn insert(&self, entry: &str, timestamp: i64, data: &'static str, labels: Labels) {
        self.insert_typed(entry, timestamp, None, data, labels);
    }

    pub fn insert_typed(
        &self,
        entry: &str,
        timestamp: i64,
        content_type: Option<&str>,
        data: &'static str,
        labels: Labels,
    ) {
        let mut state = self.lock();
        let records = state.entries.entry(entry.to_string()).or_default();
        records.push(StoredRecord {
            timestamp,
            content_type: content_type.map(str::to_string),
            labels,
            data: Bytes::from_static(data.as_bytes()),
        });
        records.sort_by_key(|record| record.timestamp);
    }

    pub fn fail_query(&self, entry: &str, status: u16) {
        self.lock().failing_queries.insert(entry.to_string(), status);
    }

    pub fn fail_writes(&self, status: u16) {
        self.lock().failing_writes = Some(status);
    }

    pub fn delay_records(&self, delay: Duration) {
        self.lock().record_delay = delay;
    }

    pub fn records(&self, entry: &str) -> Vec<StoredRecord> {
        self.lock().entries.get(entry).cloned().unwrap_or_default()
    }

    pub fn queries(&self) -> Vec<(String, RecordQuery)> {
        self.lock().queries.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak_in_flight
    }

    pub fn entry_info(&self, entry: &str) -> EntryInfo {
        let records = self.records(entry);
        EntryInfo {
            name: entry.to_string(),
            size: records.iter().map(|record| record.data.len() as u64).sum(),
            record_count: records.len() as u64,
            oldest_record: records.first().map_or(0, |record| record.timestamp),
            latest_record: records.last().map_or(0, |record| record.timestamp),
        }
    }
}

/// Counts open query streams.
struct InFlight(Arc<Mutex<BucketState>>);

impl InFlight {
    fn enter(state: Arc<Mutex<BucketState>>) -> Self {
        {
            let mut guard = state.lock().unwrap();
            guard.in_flight += 1;
            guard.peak_in_flight = guard.peak_in_flight.max(guard.in_flight);
        }
        Self(state)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.in_flight -= 1;
        }
    }
}

fn status_error(status: u16, message: &str) -> anyhow::Error {
    CliError::remote(Some(status), format!("Status {status}: {message}")).into()
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_entries(&self) -> Result<Vec<EntryInfo>> {
        let names: Vec<String> = self.lock().entries.keys().cloned().collect();
        Ok(names.iter().map(|name| self.entry_info(name)).collect())
    }

    async fn settings(&self) -> Result<BucketSettings> {
        Ok(self.lock().settings.clone())
    }

    async fn query(&self, entry: &str, query: &RecordQuery) -> Result<RecordStream> {
        let (records, delay) = {
            let mut state = self.lock();
            state.queries.push((entry.to_string(), query.clone()));
            if let Some(status) = state.failing_queries.get(entry) {
                return Err(status_error(*status, "query failed"));
            }
            let records = state.entries.get(entry).cloned().unwrap_or_default();
            (records, state.record_delay)
        };

        let guard = InFlight::enter(Arc::clone(&self.state));
        Ok(stream::unfold(
            (records.into_iter(), guard),
            move |(mut records, guard)| async move {
                let record = records.next()?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Some((Ok(record.to_record()), (records, guard)))
            },
        )
        .boxed())
    }

    async fn write(&self, entry: &str, mut record: Record) -> Result<()> {
        let data = record.read_all().await?;
        let mut state = self.lock();
        if let Some(status) = state.failing_writes {
            return Err(status_error(status, "write failed"));
        }
        let records = state.entries.entry(entry.to_string()).or_default();
        if records.iter().any(|stored| stored.timestamp == record.timestamp) {
            return Err(status_error(
                409,
                &format!("A record with timestamp {} already exists", record.timestamp),
            ));
        }
        records.push(StoredRecord {
            timestamp: record.timestamp,
            content_type: record.content_type.clone(),
            labels: record.labels.clone(),
            data: Bytes::from(data),
        });
        records.sort_by_key(|stored| stored.timestamp);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    buckets: Arc<Mutex<BTreeMap<String, MemoryBucket>>>,
}

impl MemoryStorage {
    pub fn with_bucket(self, bucket: MemoryBucket) -> Self {
        self.buckets
            .lock()
            .unwrap()
            .insert(bucket.name.clone(), bucket);
        self
    }

    pub fn bucket(&self, name: &str) -> Option<MemoryBucket> {
        self.buckets.lock().unwrap().get(name).cloned()
    }
}

impl Storage for MemoryStorage {
    type Bucket = MemoryBucket;

    async fn get_bucket(&self, name: &str) -> Result<MemoryBucket> {
        self.bucket(name)
            .ok_or_else(|| status_error(404, &format!("Bucket '{name}' is not found")))
    }

    async fn create_bucket(
        &self,
        name: &str,
        settings: &BucketSettings,
        exist_ok: bool,
    ) -> Result<MemoryBucket> {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(bucket) = buckets.get(name) {
            if exist_ok {
                return Ok(bucket.clone());
            }
            return Err(status_error(409, &format!("Bucket '{name}' already exists")));
        }
        let bucket = MemoryBucket::new(name).with_settings(settings.clone());
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }
}
