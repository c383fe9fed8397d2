//! Cursor pagination over the EBI BioSamples search API
//!
//! A day is fetched with `?cursor=*&size=N&filter=dt:update:from=Duntil=D`;
//! every following page comes from the previous page's `_links.next.href`.
//! A page without `_embedded.samples` ends the walk.

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::record::{Record, RecordStream};
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct BiosampleClient {
    client: reqwest::Client,
    base_url: Url,
    page_size: u32,
    timeout_secs: u64,
    retry: RetryPolicy,
}

/// One decoded response page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplePage {
    pub samples: Vec<Record>,
    pub next: Option<String>,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// `filter` parameter selecting samples updated on `day`
pub fn date_filter(day: NaiveDate) -> String {
    let d = day.format("%Y-%m-%d");
    format!("dt:update:from={}until={}", d, d)
}

impl BiosampleClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        page_size: u32,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| EtlError::Config(format!("invalid BioSample url {}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            page_size,
            timeout_secs,
            retry,
        })
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Self::new(
            config.http_client()?,
            &config.biosample.base_url,
            config.biosample.page_size,
            config.http.timeout_secs,
            config.retry_policy(),
        )
    }

    /// URL of the first page for `day`
    pub fn day_url(&self, day: NaiveDate) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("cursor", "*")
            .append_pair("size", &self.page_size.to_string())
            .append_pair("filter", &date_filter(day));
        url.to_string()
    }

    /// Every sample updated on `day`, characteristics flattened
    pub fn samples(&self, day: NaiveDate) -> RecordStream {
        let this = self.clone();
        stream::try_unfold(Cursor::Start, move |cursor| {
            let this = this.clone();
            async move {
                let url = match cursor {
                    Cursor::Start => this.day_url(day),
                    Cursor::Next(url) => url,
                    Cursor::Done => return Ok(None),
                };
                let page = this.fetch_page(&url).await?;
                debug!(
                    day = %day,
                    samples = page.samples.len(),
                    has_next = page.next.is_some(),
                    "Fetched page"
                );
                let next = match page.next {
                    Some(next) if !page.samples.is_empty() => Cursor::Next(next),
                    _ => Cursor::Done,
                };
                Ok::<_, EtlError>(Some((page.samples, next)))
            }
        })
        .map_ok(|samples| stream::iter(samples.into_iter().map(Ok::<Record, EtlError>)))
        .try_flatten()
        .boxed()
    }

    pub async fn fetch_page(&self, url: &str) -> Result<SamplePage> {
        let label = format!("biosample page {}", url);
        let body: Value = self
            .retry
            .run(&label, || async {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| self.request_error(url, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EtlError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                response.json().await.map_err(|e| self.request_error(url, e))
            })
            .await?;
        Ok(parse_page(body))
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> EtlError {
        if err.is_timeout() {
            EtlError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            EtlError::Http(err)
        }
    }
}

/// Split a response body into samples and the next-page link
pub fn parse_page(mut body: Value) -> SamplePage {
    let next = body
        .pointer("/_links/next/href")
        .and_then(Value::as_str)
        .map(str::to_string);
    let samples = match body.pointer_mut("/_embedded/samples").map(Value::take) {
        Some(Value::Array(samples)) => samples,
        _ => return SamplePage::default(),
    };
    SamplePage {
        samples: samples.into_iter().map(flatten_characteristics).collect(),
        next,
    }
}

/// Turn `{"characteristics": {key: [{text, ...}, ...]}}` into a list of
/// entries, each tagged with `characteristic = key`
pub fn flatten_characteristics(mut sample: Record) -> Record {
    let Some(obj) = sample.as_object_mut() else {
        return sample;
    };
    if let Some(Value::Object(map)) = obj.remove("characteristics") {
        let mut flat = Vec::new();
        for (key, values) in map {
            let Value::Array(values) = values else {
                continue;
            };
            for value in values {
                let mut entry = match value {
                    Value::Object(entry) => entry,
                    _ => Map::new(),
                };
                entry.insert("characteristic".to_string(), Value::String(key.clone()));
                flat.push(Value::Object(entry));
            }
        }
        obj.insert("characteristics".to_string(), Value::Array(flat));
    }
    sample
}
