use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::is_conflict;
use crate::storage::{Bucket, Record, RecordMeta};

/// Write buffer of the folder sink.
pub const CHUNK_SIZE: usize = 512 * 1024;

const DEFAULT_EXTENSION: &str = ".bin";

const EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("application/json", ".json"),
    ("application/xml", ".xml"),
    ("application/pdf", ".pdf"),
    ("application/zip", ".zip"),
    ("application/gzip", ".gz"),
    ("application/x-protobuf", ".pb"),
    ("application/octet-stream", ".bin"),
    ("text/plain", ".txt"),
    ("text/csv", ".csv"),
    ("text/html", ".html"),
    ("text/xml", ".xml"),
    ("audio/wav", ".wav"),
    ("audio/mpeg", ".mp3"),
    ("video/mp4", ".mp4"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The destination already held this record.
    Skipped,
}

/// Destination of a transfer.
pub trait RecordSink: Send + Sync + 'static {
    fn write(
        &self,
        entry: &str,
        record: Record,
    ) -> impl Future<Output = Result<WriteOutcome>> + Send;
}

/// Accept `txt` as well as `.txt`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

/// File extension for a content type; parameters like `; charset=utf-8` are ignored.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return DEFAULT_EXTENSION;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == mime)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Writes every record to `<root>/<entry>/<timestamp><ext>`.
#[derive(Debug, Clone)]
pub struct FolderSink {
    root: PathBuf,
    extension: Option<String>,
    with_metadata: bool,
}

impl FolderSink {
    pub fn new(root: impl Into<PathBuf>, extension: Option<&str>, with_metadata: bool) -> Self {
        Self {
            root: root.into(),
            extension: extension
                .filter(|ext| !ext.trim().is_empty())
                .map(normalize_extension),
            with_metadata,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, entry: &str, record: &Record) -> PathBuf {
        let ext = self
            .extension
            .as_deref()
            .unwrap_or_else(|| extension_for(record.content_type.as_deref()));
        self.root
            .join(entry)
            .join(format!("{}{ext}", record.timestamp))
    }

    async fn write_payload(&self, path: &Path, record: &mut Record) -> Result<()> {
        let file = fs::File::create(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        while let Some(chunk) = record.next_chunk().await? {
            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", path.display()))?;
        Ok(())
    }

    fn metadata_path(&self, entry: &str, timestamp: i64) -> PathBuf {
        self.root.join(entry).join(format!("{timestamp}.json"))
    }

    async fn write_metadata(&self, path: &Path, meta: RecordMeta) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&meta)?;
        fs::write(path, contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl RecordSink for FolderSink {
    async fn write(&self, entry: &str, mut record: Record) -> Result<WriteOutcome> {
        let dir = self.root.join(entry);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = self.record_path(entry, &record);
        let meta = self.with_metadata.then(|| record.meta());
        self.write_payload(&path, &mut record).await?;
        if let Some(meta) = meta {
            let meta_path = self.metadata_path(entry, meta.timestamp);
            if meta_path == path {
                warn!(
                    path = %path.display(),
                    "record payload already uses the metadata file name, metadata not written"
                );
            } else {
                self.write_metadata(&meta_path, meta).await?;
            }
        }
        Ok(WriteOutcome::Written)
    }
}

/// Writes records into an entry of the same name in another bucket.
pub struct BucketSink<D: Bucket> {
    bucket: D,
}

impl<D: Bucket> BucketSink<D> {
    pub fn new(bucket: D) -> Self {
        Self { bucket }
    }
}

impl<D: Bucket> RecordSink for BucketSink<D> {
    async fn write(&self, entry: &str, record: Record) -> Result<WriteOutcome> {
        let timestamp = record.timestamp;
        match self.bucket.write(entry, record).await {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(err) if is_conflict(&err) => {
                debug!(
                    bucket = self.bucket.name(),
                    entry, timestamp, "record already exists, skipping"
                );
                Ok(WriteOutcome::Skipped)
            }
            Err(err) => Err(err.context(format!(
                "failed to write record {timestamp} to '{entry}'"
            ))),
        }
    }
}
