//! NCBI full-dump extraction against a mock FTP-over-HTTP server

mod common;

use chrono::NaiveDate;
use common::{files_under, parquet_rows};
use flate2::write::GzEncoder;
use flate2::Compression;
use omirror_etl::materialize::ChunkedMaterializer;
use omirror_etl::ncbi::{DumpKind, NcbiDump, NcbiDumpExtractor, NcbiDumpSource};
use omirror_etl::partition;
use omirror_etl::retry::RetryPolicy;
use omirror_etl::storage::LocalStorage;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BIOSAMPLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<BioSampleSet>
  <BioSample accession="SAMN00000001" id="1"><Description><Title>one</Title></Description></BioSample>
  <BioSample accession="SAMN00000002" id="2"/>
  <BioSample accession="SAMN00000003" id="3">
    <Attributes><Attribute attribute_name="tissue">liver</Attribute></Attributes>
  </BioSample>
</BioSampleSet>"#;

const BIOPROJECTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<PackageSet>
  <Package><Project><Project>
    <ProjectID><ArchiveID accession="PRJNA1" archive="NCBI" id="1"/></ProjectID>
    <ProjectDescr><Title>First</Title></ProjectDescr>
  </Project></Project></Package>
</PackageSet>"#;

fn gzip(body: &str) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(body.as_bytes()).unwrap();
    gz.finish().unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

async fn mount_dumps(server: &MockServer) -> Vec<NcbiDump> {
    Mock::given(method("GET"))
        .and(path("/biosample/biosample_set.xml.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(BIOSAMPLES)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bioproject/bioproject.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(BIOPROJECTS, "application/xml"))
        .mount(server)
        .await;

    vec![
        NcbiDump::new(
            DumpKind::Bioproject,
            format!("{}/bioproject/bioproject.xml", server.uri()),
        ),
        NcbiDump::new(
            DumpKind::Biosample,
            format!("{}/biosample/biosample_set.xml.gz", server.uri()),
        ),
    ]
}

fn source() -> NcbiDumpSource {
    NcbiDumpSource::new(
        reqwest::Client::new(),
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
    )
}

#[tokio::test]
async fn test_dumps_to_bounded_parts() {
    let server = MockServer::start().await;
    let dumps = mount_dumps(&server).await;
    let root = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(root.path()));
    let extractor = NcbiDumpExtractor::new(storage.clone(), ChunkedMaterializer::new(2));

    let report = extractor.extract(&dumps, day(1), &source()).await;
    assert!(!report.has_failures(), "{}", report);
    assert_eq!(report.processed.len(), 2);
    assert_eq!(report.records_written, 4);

    assert_eq!(
        files_under(root.path()),
        vec![
            "ncbi/bioproject/date=2025-03-01/_done.json",
            "ncbi/bioproject/date=2025-03-01/data_00000.parquet",
            "ncbi/biosample/date=2025-03-01/_done.json",
            "ncbi/biosample/date=2025-03-01/data_00000.parquet",
            "ncbi/biosample/date=2025-03-01/data_00001.parquet",
        ]
    );
    assert_eq!(
        parquet_rows(&root.path().join("ncbi/biosample/date=2025-03-01/data_00001.parquet")),
        1
    );

    let marker = partition::read_marker(storage.as_ref(), "ncbi/biosample/date=2025-03-01")
        .await
        .unwrap();
    assert_eq!(marker.entity, "biosample");
    assert_eq!(marker.records_written, 3);
    assert_eq!(marker.parts_written, 2);
}

#[tokio::test]
async fn test_same_day_skips_and_next_day_replaces() {
    let server = MockServer::start().await;
    let dumps = mount_dumps(&server).await;
    let root = tempfile::tempdir().unwrap();
    let extractor = NcbiDumpExtractor::new(
        Arc::new(LocalStorage::new(root.path())),
        ChunkedMaterializer::new(10),
    );

    extractor.extract(&dumps, day(1), &source()).await;
    let requests = server.received_requests().await.unwrap().len();
    assert_eq!(requests, 2);

    let again = extractor.extract(&dumps, day(1), &source()).await;
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), requests);

    let next = extractor.extract(&dumps, day(2), &source()).await;
    assert_eq!(next.processed.len(), 2);
    let files = files_under(root.path());
    assert!(files.iter().all(|f| f.contains("date=2025-03-02")), "{:?}", files);
    assert_eq!(files.len(), 4);
}

#[tokio::test]
async fn test_failed_dump_keeps_previous_partition() {
    let server = MockServer::start().await;
    let mut dumps = mount_dumps(&server).await;
    let root = tempfile::tempdir().unwrap();
    let extractor = NcbiDumpExtractor::new(
        Arc::new(LocalStorage::new(root.path())),
        ChunkedMaterializer::new(10),
    );
    extractor.extract(&dumps, day(1), &source()).await;

    dumps[0].url = format!("{}/bioproject/missing.xml", server.uri());
    let report = extractor.extract(&dumps, day(2), &source()).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.processed.len(), 1);

    let files = files_under(root.path());
    assert!(files.contains(&"ncbi/bioproject/date=2025-03-01/_done.json".to_string()));
    assert!(!files.iter().any(|f| f.starts_with("ncbi/biosample/date=2025-03-01")));
}
