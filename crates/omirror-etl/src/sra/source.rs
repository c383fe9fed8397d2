//! Streaming record source over a remote (or local) `*.xml[.gz]` file
//!
//! The HTTP body is decompressed and parsed on a blocking thread as it
//! arrives; nothing is staged on disk. Rows are handed back over a bounded
//! channel so a slow consumer stalls the download instead of buffering it.

use super::mirror::MirrorEntry;
use super::schema::to_row;
use super::xml::{for_each_record, XmlNode};
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::record::{Record, RecordSource, RecordStream};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use futures::{StreamExt, TryStreamExt};
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, instrument};

const CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
pub struct SraXmlSource {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl SraXmlSource {
    /// `client` must not carry a whole-request timeout: a Full snapshot body
    /// takes far longer than any sane per-request limit to stream.
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(Self::new(config.stream_client()?, config.retry_policy()))
    }
}

/// Open `url` for streaming reads. `http(s)` URLs are fetched with `client`;
/// only the request and its status line are retried, once the body starts
/// streaming a failure is final. Anything else is a local path (an optional
/// `file://` prefix is stripped).
pub(crate) async fn open_url(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    url: &str,
) -> Result<Box<dyn Read + Send>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let label = format!("download {}", url);
        let response = retry
            .run(&label, || async {
                let response = client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EtlError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(response)
            })
            .await?;
        let body = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        Ok(Box::new(SyncIoBridge::new(StreamReader::new(body))))
    } else {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        let file = tokio::task::spawn_blocking(move || std::fs::File::open(path)).await??;
        Ok(Box::new(file))
    }
}

/// Parse `raw` on a blocking thread and stream one `convert`ed row per
/// `<tag>` element. `.gz` URLs are decompressed on the fly.
pub(crate) fn xml_record_stream<F>(
    raw: Box<dyn Read + Send>,
    url: String,
    tag: &'static str,
    convert: F,
) -> RecordStream
where
    F: Fn(&XmlNode) -> Record + Send + 'static,
{
    let gzipped = url.ends_with(".gz");
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        let input: Box<dyn Read + Send> = if gzipped {
            Box::new(MultiGzDecoder::new(raw))
        } else {
            raw
        };
        let result = parse_into(BufReader::new(input), tag, &convert, &tx);
        match result {
            Ok(count) => info!(url = %url, records = count, "Finished parsing"),
            Err(e) => {
                // receiver may already be gone
                let _ = tx.blocking_send(Err(e));
            },
        }
    });

    // surface a crashed parser instead of ending the stream quietly
    let tail = futures::stream::once(async move {
        match handle.await {
            Ok(()) => None,
            Err(e) => Some(Err(EtlError::from(e))),
        }
    })
    .filter_map(futures::future::ready);

    ReceiverStream::new(rx).chain(tail).boxed()
}

#[async_trait]
impl RecordSource for SraXmlSource {
    #[instrument(skip(self, entry), fields(url = %entry.url, entity = %entry.entity))]
    async fn open(&self, entry: &MirrorEntry) -> Result<RecordStream> {
        let raw = open_url(&self.client, &self.retry, &entry.url).await?;
        let entity = entry.entity;
        Ok(xml_record_stream(
            raw,
            entry.url.clone(),
            entity.xml_tag(),
            move |node| to_row(entity, node),
        ))
    }
}

fn parse_into<R, F>(
    input: R,
    tag: &str,
    convert: &F,
    tx: &mpsc::Sender<Result<Record>>,
) -> Result<usize>
where
    R: std::io::BufRead,
    F: Fn(&XmlNode) -> Record,
{
    for_each_record(input, tag, |node| {
        if tx.blocking_send(Ok(convert(&node))).is_err() {
            debug!("Record consumer dropped; stopping parse");
            return Ok(false);
        }
        Ok(true)
    })
}
