//! Record sources for the quire pipeline.
//!
//! - [`load_records`]: read a whole XML or JSON document and locate its records
//! - [`find_records`]: record discovery inside an already parsed tree
//! - [`ElementStream`]: pull `<tag>` fragments lazily from arbitrarily large XML input
//!
//! Records are plain [`serde_json::Value`]s with insertion order preserved.

mod error;
mod records;
pub mod stream;
pub mod xml;

pub use error::SourceError;
pub use records::{find_records, fragment_record, load_records, parse_json_records};
pub use stream::{ElementScanner, ElementStream};
pub use xml::parse_xml;

/// One unit of input data, consumed by exactly one render job.
pub type Record = serde_json::Value;
