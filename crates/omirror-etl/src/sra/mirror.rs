//! Mirror entries and current-batch classification
//!
//! NCBI publishes the SRA metadata as dated snapshot directories, e.g.
//! `NCBI_SRA_Mirroring_20250101_Full/meta_study_set.xml.gz`. The current
//! state is the newest Full snapshot plus every Incremental issued after it;
//! everything older is history.

use crate::error::{EtlError, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Study,
    Sample,
    Experiment,
    Run,
}

impl Entity {
    pub const ALL: [Entity; 4] = [Entity::Study, Entity::Sample, Entity::Experiment, Entity::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Study => "study",
            Entity::Sample => "sample",
            Entity::Experiment => "experiment",
            Entity::Run => "run",
        }
    }

    /// Element name of one record in the entity's XML set
    pub fn xml_tag(&self) -> &'static str {
        match self {
            Entity::Study => "STUDY",
            Entity::Sample => "SAMPLE",
            Entity::Experiment => "EXPERIMENT",
            Entity::Run => "RUN",
        }
    }

    /// Match order matters: `study`, `sample`, `experiment`, then `run`
    fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Entity::ALL.into_iter().find(|e| lower.contains(e.as_str()))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "study" => Ok(Entity::Study),
            "sample" => Ok(Entity::Sample),
            "experiment" => Ok(Entity::Experiment),
            "run" => Ok(Entity::Run),
            other => Err(EtlError::Parse(format!("unknown entity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Full,
    Incremental,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Full => "Full",
            Stage::Incremental => "Incremental",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Stage::Full)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorEntry {
    pub url: String,
    pub entity: Entity,
    pub stage: Stage,
    pub snapshot_date: NaiveDate,
    pub in_current_batch: bool,
}

#[allow(clippy::unwrap_used)]
fn snapshot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_Mirroring_(\d{8})").unwrap())
}

impl MirrorEntry {
    /// Parse a snapshot file URL. `in_current_batch` starts out false.
    pub fn parse(url: &str) -> Result<Self> {
        let file_name = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url);
        let entity = Entity::from_file_name(file_name)
            .ok_or_else(|| EtlError::Parse(format!("no entity in {}", url)))?;

        let stage = if url.contains("Full") {
            Stage::Full
        } else {
            Stage::Incremental
        };

        let digits = snapshot_re()
            .captures(url)
            .and_then(|c| c.get(1))
            .ok_or_else(|| EtlError::Parse(format!("no snapshot date in {}", url)))?;
        let snapshot_date = NaiveDate::parse_from_str(digits.as_str(), "%Y%m%d")
            .map_err(|e| EtlError::Parse(format!("bad snapshot date in {}: {}", url, e)))?;

        Ok(Self {
            url: url.to_string(),
            entity,
            stage,
            snapshot_date,
            in_current_batch: false,
        })
    }

    pub fn is_full(&self) -> bool {
        self.stage.is_full()
    }

    /// Relative partition directory: `{entity}/date={YYYY-MM-DD}/stage={stage}`
    pub fn partition_dir(&self) -> String {
        format!(
            "{}/date={}/stage={}",
            self.entity,
            self.snapshot_date.format("%Y-%m-%d"),
            self.stage
        )
    }
}

/// Newest first; Full before Incremental on the same date; then URL
/// descending so the order is total.
fn newest_first(a: &MirrorEntry, b: &MirrorEntry) -> Ordering {
    b.snapshot_date
        .cmp(&a.snapshot_date)
        .then_with(|| match (a.stage, b.stage) {
            (Stage::Full, Stage::Incremental) => Ordering::Less,
            (Stage::Incremental, Stage::Full) => Ordering::Greater,
            _ => Ordering::Equal,
        })
        .then_with(|| b.url.cmp(&a.url))
}

#[derive(Debug, Default)]
struct BatchState {
    found_full: bool,
    out_of_full: bool,
    full_date: Option<NaiveDate>,
}

/// Parse and tag every URL. Unparseable URLs are dropped with a warning.
/// The result is sorted newest first.
pub fn classify<S: AsRef<str>>(urls: &[S]) -> Vec<MirrorEntry> {
    let mut entries: Vec<MirrorEntry> = urls
        .iter()
        .filter_map(|url| match MirrorEntry::parse(url.as_ref()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(url = url.as_ref(), "Skipping mirror entry: {}", e);
                None
            },
        })
        .collect();
    entries.sort_by(newest_first);

    let mut state = BatchState::default();
    for entry in entries.iter_mut() {
        if entry.is_full() && !state.found_full {
            state.found_full = true;
            state.full_date = Some(entry.snapshot_date);
        }
        if state.found_full {
            // other entity files of the same Full snapshot stay current
            let same_full = entry.is_full() && state.full_date == Some(entry.snapshot_date);
            if !same_full {
                state.out_of_full = true;
            }
        }
        entry.in_current_batch = !state.out_of_full;
    }

    debug!(
        entries = entries.len(),
        current = entries.iter().filter(|e| e.in_current_batch).count(),
        "Classified mirror listing"
    );
    entries
}

/// Optional narrowing applied after classification
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub entity: Option<Entity>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub max_entries: Option<usize>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &MirrorEntry) -> bool {
        self.entity.map_or(true, |e| entry.entity == e)
            && self.since.map_or(true, |d| entry.snapshot_date >= d)
            && self.until.map_or(true, |d| entry.snapshot_date <= d)
    }

    pub fn apply(&self, entries: Vec<MirrorEntry>) -> Vec<MirrorEntry> {
        let filtered = entries.into_iter().filter(|e| self.matches(e));
        match self.max_entries {
            Some(n) => filtered.take(n).collect(),
            None => filtered.collect(),
        }
    }
}

/// One line per entry: `entity  date  stage  CURRENT|old  url`
pub fn format_entries(entries: &[MirrorEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!(
            "{:<11} {} {:<11} {:<7} {}\n",
            e.entity,
            e.snapshot_date.format("%Y-%m-%d"),
            e.stage,
            if e.in_current_batch { "CURRENT" } else { "old" },
            e.url
        ));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const BASE: &str = "https://ftp.ncbi.nlm.nih.gov/sra/reports/Mirroring";

    fn url(snapshot: &str, file: &str) -> String {
        format!("{}/NCBI_SRA_Mirroring_{}/{}", BASE, snapshot, file)
    }

    #[test]
    fn test_parse_entry() {
        let entry = MirrorEntry::parse(&url("20250103_Incremental", "meta_experiment_set.xml.gz")).unwrap();
        assert_eq!(entry.entity, Entity::Experiment);
        assert_eq!(entry.stage, Stage::Incremental);
        assert_eq!(entry.snapshot_date, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
        assert_eq!(entry.partition_dir(), "experiment/date=2025-01-03/stage=Incremental");
        assert!(!entry.in_current_batch);

        let entry = MirrorEntry::parse(&url("20250101_Full", "meta_run_set.xml.gz")).unwrap();
        assert_eq!(entry.entity, Entity::Run);
        assert!(entry.is_full());
    }

    #[test]
    fn test_parse_errors() {
        assert!(MirrorEntry::parse(&url("20250101_Full", "meta_analysis_set.xml.gz")).is_err());
        assert!(MirrorEntry::parse(&format!("{}/misc/meta_study_set.xml.gz", BASE)).is_err());
        assert!(MirrorEntry::parse(&url("20250230_Full", "meta_study_set.xml.gz")).is_err());
    }

    #[test]
    fn test_three_url_example() {
        let urls = vec![
            url("20250101_Full", "meta_study_set.xml.gz"),
            url("20250103_Incremental", "meta_study_set.xml.gz"),
            url("20241201_Full", "meta_study_set.xml.gz"),
        ];
        let entries = classify(&urls);
        let current = |u: &str| entries.iter().find(|e| e.url == u).unwrap().in_current_batch;
        assert!(current(&urls[0]));
        assert!(current(&urls[1]));
        assert!(!current(&urls[2]));
    }

    #[test]
    fn test_same_day_full_files_all_current() {
        let mut urls: Vec<String> = Entity::ALL
            .iter()
            .map(|e| url("20250101_Full", &format!("meta_{}_set.xml.gz", e)))
            .collect();
        urls.push(url("20250102_Incremental", "meta_run_set.xml.gz"));
        urls.push(url("20241231_Incremental", "meta_run_set.xml.gz"));
        urls.push(url("20241201_Full", "meta_run_set.xml.gz"));

        let entries = classify(&urls);
        let current: Vec<_> = entries.iter().filter(|e| e.in_current_batch).collect();
        assert_eq!(current.len(), 5);
        assert!(current.iter().all(|e| e.snapshot_date >= NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
    }

    #[test]
    fn test_no_full_means_all_current() {
        let urls = vec![
            url("20250103_Incremental", "meta_study_set.xml.gz"),
            url("20250102_Incremental", "meta_sample_set.xml.gz"),
            "not a mirror url".to_string(),
        ];
        let entries = classify(&urls);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.in_current_batch));
    }

    #[test]
    fn test_current_batch_is_prefix() {
        let urls = vec![
            url("20240101_Full", "meta_study_set.xml.gz"),
            url("20240301_Incremental", "meta_study_set.xml.gz"),
            url("20240601_Full", "meta_study_set.xml.gz"),
            url("20240701_Incremental", "meta_study_set.xml.gz"),
            url("20240201_Incremental", "meta_study_set.xml.gz"),
        ];
        let entries = classify(&urls);
        let flags: Vec<bool> = entries.iter().map(|e| e.in_current_batch).collect();
        assert_eq!(flags, vec![true, true, false, false, false]);
        assert_eq!(entries[0].snapshot_date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
    }

    #[test]
    fn test_entry_filter() {
        let urls = vec![
            url("20250101_Full", "meta_study_set.xml.gz"),
            url("20250101_Full", "meta_run_set.xml.gz"),
            url("20250105_Incremental", "meta_run_set.xml.gz"),
        ];
        let entries = classify(&urls);

        let filter = EntryFilter {
            entity: Some(Entity::Run),
            ..Default::default()
        };
        assert_eq!(filter.apply(entries.clone()).len(), 2);

        let filter = EntryFilter {
            since: NaiveDate::from_ymd_opt(2025, 1, 2),
            ..Default::default()
        };
        assert_eq!(filter.apply(entries.clone()).len(), 1);

        let filter = EntryFilter {
            max_entries: Some(1),
            ..Default::default()
        };
        assert_eq!(filter.apply(entries).len(), 1);
    }

    #[test]
    fn test_format_entries() {
        let entries = classify(&[url("20250101_Full", "meta_study_set.xml.gz")]);
        let text = format_entries(&entries);
        assert!(text.starts_with("study"));
        assert!(text.contains("2025-01-01"));
        assert!(text.contains("CURRENT"));
    }
}
