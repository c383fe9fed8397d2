//! NCBI SRA mirror snapshots
//!
//! Discovery ([`listing`]), batch classification ([`mirror`]), streaming XML
//! parsing ([`xml`], [`source`]) and the resumable partition catalog
//! ([`catalog`]).

pub mod catalog;
pub mod listing;
pub mod mirror;
pub mod schema;
pub mod source;
pub mod xml;

pub use catalog::{PartitionCatalog, ProcessOutcome};
pub use listing::MirrorListing;
pub use mirror::{classify, Entity, EntryFilter, MirrorEntry, Stage};
pub use source::SraXmlSource;
