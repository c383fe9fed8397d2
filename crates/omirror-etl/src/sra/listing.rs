//! Discovery of snapshot files from the mirror's HTML directory index
//!
//! The root index links one directory per snapshot
//! (`NCBI_SRA_Mirroring_YYYYMMDD_{Full|Incremental}/`); each of those links
//! the `*set.xml.gz` files. Any fetch failure here is fatal to the run.

use crate::error::{EtlError, Result};
use crate::retry::RetryPolicy;
use futures::{stream, StreamExt, TryStreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct MirrorListing {
    client: reqwest::Client,
    root: Url,
    concurrency: usize,
    retry: RetryPolicy,
}

impl MirrorListing {
    pub fn new(
        client: reqwest::Client,
        root: &str,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client,
            root: directory_url(root)?,
            concurrency: concurrency.max(1),
            retry,
        })
    }

    /// Every snapshot file URL under the mirror root, sorted
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn list_urls(&self) -> Result<Vec<String>> {
        let html = self.fetch(&self.root).await?;
        let dirs = parse_snapshot_dirs(&html, &self.root)?;
        info!(snapshots = dirs.len(), "Found snapshot directories");

        let nested: Vec<Vec<String>> = stream::iter(dirs)
            .map(|dir| async move {
                let html = self.fetch(&dir).await?;
                parse_set_files(&html, &dir)
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut urls: Vec<String> = nested.into_iter().flatten().collect();
        urls.sort();
        urls.dedup();
        info!(files = urls.len(), "Listed mirror files");
        Ok(urls)
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!("Fetching directory listing from: {}", url);
        let label = format!("listing {}", url);
        self.retry
            .run(&label, || async {
                let response = self.client.get(url.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EtlError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(response.text().await?)
            })
            .await
            .map_err(|e| EtlError::Listing(format!("{}: {}", url, e)))
    }
}

fn directory_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).map_err(|e| EtlError::Listing(format!("invalid mirror url {}: {}", raw, e)))
}

fn hrefs(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a").map_err(|e| EtlError::Listing(e.to_string()))?;
    Ok(document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect())
}

/// Snapshot directory links in the root index
pub fn parse_snapshot_dirs(html: &str, base: &Url) -> Result<Vec<Url>> {
    let pattern = Regex::new(r"NCBI_SRA_Mirroring_\d{8}_(Full|Incremental)$")?;
    let mut dirs = Vec::new();
    for href in hrefs(html)? {
        let trimmed = href.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        if pattern.is_match(last) {
            let joined = base
                .join(&format!("{}/", trimmed))
                .map_err(|e| EtlError::Listing(format!("bad link {}: {}", href, e)))?;
            dirs.push(joined);
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

/// `*set.xml.gz` links in one snapshot directory
pub fn parse_set_files(html: &str, base: &Url) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for href in hrefs(html)? {
        if href.ends_with("set.xml.gz") {
            let joined = base
                .join(&href)
                .map_err(|e| EtlError::Listing(format!("bad link {}: {}", href, e)))?;
            files.push(joined.to_string());
        }
    }
    Ok(files)
}
