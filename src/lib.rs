#![deny(trivial_casts, trivial_numeric_casts, unused_import_braces)]
//! # MaxMind DB dump and build tools
//!
//! This crate prints what MaxMind DB files hold for an address and builds
//! such files from GeoLite2 City CSV exports.
//!
//! Reading is done by the [`maxminddb`] crate; this crate adds:
//!
//! - [`dump`]: one lookup per database, printed as a bold red label, a
//!   72-character rule and the record as pretty JSON (`null` when the
//!   address has no record)
//! - [`Writer`]: a MaxMind DB writer (search tree, data section encoder,
//!   metadata) for any `serde::Serialize` record
//! - [`import`]: loading GeoLite2 City locations/blocks CSV files into a
//!   [`Writer`]
//!
//! ## Features
//!
//! - **`cli`** (default: enabled): build the `csv2mmdb` converter
//! - **`mmap`** (default: disabled): open databases with memory mapping
//! - **`simdutf8`** (default: disabled): SIMD UTF-8 validation when reading
//!
//! ## Quick Start
//!
//! ```rust
//! use mmdbdump::{dump, Writer, WriterOptions};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut writer = Writer::new(WriterOptions::default());
//!     writer.insert("1.2.3.0/24".parse()?, &json!({"city": "Testville", "country": "XX"}))?;
//!
//!     let reader = maxminddb::Reader::from_source(writer.to_bytes()?)?;
//!     let value = dump::lookup_value(&reader, "1.2.3.4".parse()?)?;
//!     print!("{}", dump::render_block("test.mmdb", value.as_ref())?);
//!     Ok(())
//! }
//! ```

pub mod dump;
pub mod encoder;
mod error;
pub mod geoname;
pub mod import;
mod metadata;
pub mod tree;
mod writer;

pub use dump::{dump_all, dump_target, DumpConfig, DumpTarget};
pub use error::MmdbError;
pub use geoname::GeoName;
pub use metadata::Metadata;
pub use tree::{IpVersion, RecordSize};
pub use writer::{Writer, WriterOptions, METADATA_START_MARKER};
