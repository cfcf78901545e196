use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use urlencoding::encode;

use super::{
    Bucket, BucketSettings, ChunkStream, EntryInfo, Labels, Record, RecordQuery, RecordStream,
    Storage,
};
use crate::config::Alias;
use crate::error::CliError;

const API_PREFIX: &str = "/api/v1";
const ERROR_HEADER: &str = "x-reduct-error";
const TIME_HEADER: &str = "x-reduct-time";
const LAST_HEADER: &str = "x-reduct-last";
const LABEL_HEADER_PREFIX: &str = "x-reduct-label-";

struct Inner {
    http: Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

/// HTTP client for one storage server, built from an alias.
#[derive(Clone)]
pub struct ReductClient {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct HttpBucket {
    inner: Arc<Inner>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FullBucketInfo {
    #[serde(default)]
    settings: BucketSettings,
    #[serde(default)]
    entries: Vec<EntryInfo>,
}

#[derive(Debug, Deserialize)]
struct QueryInfo {
    id: u64,
}

impl ReductClient {
    pub fn new(alias: &Alias, timeout: Duration) -> Result<Self> {
        // Record bodies are bounded per read, not as a whole.
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: alias.url.trim_end_matches('/').to_string(),
                token: alias.token.clone(),
                timeout,
            }),
        })
    }

    fn bucket(&self, name: &str) -> HttpBucket {
        HttpBucket {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| CliError::remote(None, format!("request failed: {err}")))?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.url(path)).timeout(self.timeout);
        let response = self.send(request).await?;
        response
            .json()
            .await
            .with_context(|| format!("failed to parse response of GET {path}"))
    }

    async fn bucket_info(&self, name: &str) -> Result<FullBucketInfo> {
        self.get_json(&format!("/b/{}", encode(name))).await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_message = response
        .headers()
        .get(ERROR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let message = match header_message {
        Some(message) => message,
        None => {
            let body = response.text().await.unwrap_or_default();
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        }
    };
    let code = status.as_u16();
    Err(CliError::remote(Some(code), format!("Status {code}: {message}")).into())
}

impl Storage for ReductClient {
    type Bucket = HttpBucket;

    async fn get_bucket(&self, name: &str) -> Result<HttpBucket> {
        self.inner.bucket_info(name).await?;
        Ok(self.bucket(name))
    }

    async fn create_bucket(
        &self,
        name: &str,
        settings: &BucketSettings,
        exist_ok: bool,
    ) -> Result<HttpBucket> {
        let request = self
            .inner
            .http
            .post(self.inner.url(&format!("/b/{}", encode(name))))
            .timeout(self.inner.timeout)
            .json(settings);
        match self.inner.send(request).await {
            Ok(_) => Ok(self.bucket(name)),
            Err(err) if exist_ok && crate::error::is_conflict(&err) => {
                debug!(bucket = name, "bucket already exists");
                Ok(self.bucket(name))
            }
            Err(err) => Err(err),
        }
    }
}

impl Bucket for HttpBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_entries(&self) -> Result<Vec<EntryInfo>> {
        Ok(self.inner.bucket_info(&self.name).await?.entries)
    }

    async fn settings(&self) -> Result<BucketSettings> {
        Ok(self.inner.bucket_info(&self.name).await?.settings)
    }

    async fn query(&self, entry: &str, query: &RecordQuery) -> Result<RecordStream> {
        let path = format!("/b/{}/{}/q", encode(&self.name), encode(entry));
        let request = self
            .inner
            .http
            .get(self.inner.url(&path))
            .timeout(self.inner.timeout)
            .query(&query_params(query));
        let response = self.inner.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(stream::empty().boxed());
        }
        let info: QueryInfo = response
            .json()
            .await
            .with_context(|| format!("failed to parse query response for '{entry}'"))?;
        debug!(bucket = %self.name, entry, query_id = info.id, "query opened");

        let cursor = QueryCursor {
            inner: Arc::clone(&self.inner),
            path: format!("/b/{}/{}", encode(&self.name), encode(entry)),
            id: info.id,
            done: false,
        };
        Ok(stream::try_unfold(cursor, QueryCursor::advance).boxed())
    }

    async fn write(&self, entry: &str, record: Record) -> Result<()> {
        let path = format!("/b/{}/{}", encode(&self.name), encode(entry));
        let content_type = record
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut request = self
            .inner
            .http
            .post(self.inner.url(&path))
            .query(&[("ts", record.timestamp.to_string())])
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, record.size);
        for (key, value) in &record.labels {
            request = request.header(format!("{LABEL_HEADER_PREFIX}{key}"), value);
        }
        let body = Body::wrap_stream(record.into_body());
        self.inner.send(request.body(body)).await?;
        Ok(())
    }
}

fn query_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("start".to_string(), query.start.to_string()),
        ("stop".to_string(), query.stop.to_string()),
        ("ttl".to_string(), query.ttl.as_secs().to_string()),
    ];
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    for (key, value) in &query.include {
        params.push((format!("include-{key}"), value.clone()));
    }
    for (key, value) in &query.exclude {
        params.push((format!("exclude-{key}"), value.clone()));
    }
    params
}

struct QueryCursor {
    inner: Arc<Inner>,
    path: String,
    id: u64,
    done: bool,
}

impl QueryCursor {
    async fn advance(mut self) -> Result<Option<(Record, Self)>> {
        if self.done {
            return Ok(None);
        }
        Ok(self.next_record().await?.map(|record| (record, self)))
    }

    async fn next_record(&mut self) -> Result<Option<Record>> {
        let request = self
            .inner
            .http
            .get(self.inner.url(&self.path))
            .query(&[("q", self.id.to_string())]);
        let response = self.inner.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            self.done = true;
            return Ok(None);
        }

        let headers = response.headers();
        let timestamp = header_str(headers, TIME_HEADER)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| CliError::remote(None, "record without a valid x-reduct-time header"))?;
        let size = header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or_default();
        let content_type = header_str(headers, CONTENT_TYPE.as_str()).map(str::to_string);
        let labels = labels_from_headers(headers);
        self.done = header_str(headers, LAST_HEADER) == Some("1");

        Ok(Some(Record::new(
            timestamp,
            size,
            content_type,
            labels,
            body_stream(response),
        )))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn labels_from_headers(headers: &HeaderMap) -> Labels {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(LABEL_HEADER_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

fn body_stream(response: Response) -> ChunkStream {
    stream::try_unfold(response, next_body_chunk).boxed()
}

async fn next_body_chunk(mut response: Response) -> Result<Option<(Bytes, Response)>> {
    let chunk = response
        .chunk()
        .await
        .context("failed to read record body")?;
    Ok(chunk.map(|chunk| (chunk, response)))
}
