//! The two NCBI full dumps and where they come from

use crate::config::EtlConfig;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpKind {
    Biosample,
    Bioproject,
}

impl DumpKind {
    pub const ALL: [DumpKind; 2] = [DumpKind::Bioproject, DumpKind::Biosample];

    pub fn as_str(&self) -> &'static str {
        match self {
            DumpKind::Biosample => "biosample",
            DumpKind::Bioproject => "bioproject",
        }
    }

    /// Element holding one record
    pub fn xml_tag(&self) -> &'static str {
        match self {
            DumpKind::Biosample => "BioSample",
            DumpKind::Bioproject => "Package",
        }
    }
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dump file to materialize
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NcbiDump {
    pub kind: DumpKind,
    pub url: String,
}

impl NcbiDump {
    pub fn new(kind: DumpKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    pub fn from_config(kind: DumpKind, config: &EtlConfig) -> Self {
        let url = match kind {
            DumpKind::Biosample => &config.ncbi.biosample_url,
            DumpKind::Bioproject => &config.ncbi.bioproject_url,
        };
        Self::new(kind, url.clone())
    }
}
