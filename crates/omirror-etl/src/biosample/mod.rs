//! EBI BioSample daily snapshots

pub mod extract;
pub mod fetcher;
pub mod schema;

pub use extract::BiosampleExtractor;
pub use fetcher::BiosampleClient;
