//! Narrow interface to the remote storage server.
//!
//! The transfer engine only talks to [`Storage`] and [`Bucket`]; the HTTP
//! implementation lives in [`http`] and tests substitute in-memory buckets.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod http;

pub type Labels = BTreeMap<String, String>;
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Summary of one entry as reported by the bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub oldest_record: i64,
    #[serde(default)]
    pub latest_record: i64,
}

/// Bucket settings are copied verbatim from one server to another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketSettings(pub Map<String, Value>);

/// Arguments of one server-side query over an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub start: i64,
    pub stop: i64,
    pub include: Labels,
    pub exclude: Labels,
    pub ttl: Duration,
    pub limit: Option<u64>,
}

/// Metadata of a record, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMeta {
    pub timestamp: i64,
    pub content_type: Option<String>,
    pub size: u64,
    pub labels: Labels,
}

/// One record read from an entry. The payload is streamed and can be
/// consumed only once.
pub struct Record {
    pub timestamp: i64,
    pub size: u64,
    pub content_type: Option<String>,
    pub labels: Labels,
    body: ChunkStream,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("timestamp", &self.timestamp)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl Record {
    pub fn new(
        timestamp: i64,
        size: u64,
        content_type: Option<String>,
        labels: Labels,
        body: ChunkStream,
    ) -> Self {
        Self {
            timestamp,
            size,
            content_type,
            labels,
            body,
        }
    }

    #[cfg(test)]
    pub fn from_bytes(
        timestamp: i64,
        content_type: Option<&str>,
        labels: Labels,
        data: impl Into<Bytes>,
    ) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        let body = futures_util::stream::once(async move { Ok(data) }).boxed();
        Self::new(
            timestamp,
            size,
            content_type.map(str::to_string),
            labels,
            body,
        )
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            timestamp: self.timestamp,
            content_type: self.content_type.clone(),
            size: self.size,
            labels: self.labels.clone(),
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.body
            .next()
            .await
            .transpose()
            .with_context(|| format!("failed to read payload of record {}", self.timestamp))
    }

    /// Hand the remaining payload over to a request body.
    pub fn into_body(self) -> ChunkStream {
        self.body
    }

    /// Collect the remaining payload into memory.
    #[cfg(test)]
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size as usize);
        while let Some(chunk) = self.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

pub trait Bucket: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn list_entries(&self) -> impl Future<Output = Result<Vec<EntryInfo>>> + Send;

    fn settings(&self) -> impl Future<Output = Result<BucketSettings>> + Send;

    /// Open a lazy stream of the records of `entry` matching `query`.
    fn query(
        &self,
        entry: &str,
        query: &RecordQuery,
    ) -> impl Future<Output = Result<RecordStream>> + Send;

    fn write(&self, entry: &str, record: Record) -> impl Future<Output = Result<()>> + Send;
}

pub trait Storage: Send + Sync {
    type Bucket: Bucket;

    fn get_bucket(&self, name: &str) -> impl Future<Output = Result<Self::Bucket>> + Send;

    /// Create a bucket. With `exist_ok` an existing bucket is returned as is.
    fn create_bucket(
        &self,
        name: &str,
        settings: &BucketSettings,
        exist_ok: bool,
    ) -> impl Future<Output = Result<Self::Bucket>> + Send;
}
