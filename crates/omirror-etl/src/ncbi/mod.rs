//! NCBI BioSample and BioProject full dumps
//!
//! Each dump is a single large XML document, streamed into bounded Parquet
//! parts through the same materializer and done-marker protocol as the SRA
//! mirror.

pub mod dump;
pub mod extract;
pub mod schema;
pub mod source;

pub use dump::{DumpKind, NcbiDump};
pub use extract::NcbiDumpExtractor;
pub use source::NcbiDumpSource;
