//! Streaming record source over the NCBI full dumps. `biosample_set.xml.gz`
//! is decompressed on the fly, `bioproject.xml` is read as is.

use super::dump::NcbiDump;
use super::schema::to_row;
use crate::config::EtlConfig;
use crate::error::Result;
use crate::record::{RecordSource, RecordStream};
use crate::retry::RetryPolicy;
use crate::sra::source::{open_url, xml_record_stream};
use async_trait::async_trait;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct NcbiDumpSource {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl NcbiDumpSource {
    /// `client` should only bound connecting; the dumps are tens of GB.
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(Self::new(config.stream_client()?, config.retry_policy()))
    }
}

#[async_trait]
impl RecordSource<NcbiDump> for NcbiDumpSource {
    #[instrument(skip(self, dump), fields(url = %dump.url, kind = %dump.kind))]
    async fn open(&self, dump: &NcbiDump) -> Result<RecordStream> {
        let raw = open_url(&self.client, &self.retry, &dump.url).await?;
        let kind = dump.kind;
        Ok(xml_record_stream(
            raw,
            dump.url.clone(),
            kind.xml_tag(),
            move |node| to_row(kind, node),
        ))
    }
}
