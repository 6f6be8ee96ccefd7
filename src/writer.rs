//! MaxMind DB file writer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use log::{debug, info};
use serde::Serialize;

use crate::encoder::{self, DataSection};
use crate::error::MmdbError;
use crate::metadata::{current_epoch, Metadata};
use crate::tree::{IpVersion, RecordSize, SearchTree, DATA_SECTION_SEPARATOR_SIZE};

/// Marker that precedes the metadata section.
pub const METADATA_START_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// Settings recorded in the database metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub database_type: String,
    pub description: BTreeMap<String, String>,
    pub languages: Vec<String>,
    pub ip_version: IpVersion,
    pub record_size: RecordSize,
    /// Build time in seconds since the Unix epoch; `None` uses the time of writing.
    pub build_epoch: Option<u64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            database_type: "GeoIP2-City".to_owned(),
            description: BTreeMap::from([("en".to_owned(), "GeoIP2 City database".to_owned())]),
            languages: vec!["en".to_owned()],
            ip_version: IpVersion::default(),
            record_size: RecordSize::default(),
            build_epoch: None,
        }
    }
}

/// Builds a MaxMind DB file in memory.
///
/// # Example
///
/// ```
/// use mmdbdump::{Writer, WriterOptions};
/// use serde_json::json;
///
/// let mut writer = Writer::new(WriterOptions::default());
/// writer
///     .insert("1.2.3.0/24".parse().unwrap(), &json!({"city": "Testville"}))
///     .unwrap();
/// let bytes = writer.to_bytes().unwrap();
///
/// let reader = maxminddb::Reader::from_source(bytes).unwrap();
/// let result = reader.lookup("1.2.3.4".parse().unwrap()).unwrap();
/// assert!(result.has_data());
/// ```
#[derive(Debug)]
pub struct Writer {
    options: WriterOptions,
    tree: SearchTree,
    data: DataSection,
}

impl Writer {
    pub fn new(options: WriterOptions) -> Writer {
        Writer {
            tree: SearchTree::new(options.ip_version),
            data: DataSection::new(),
            options,
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Stores `record` for every address in `network`.
    ///
    /// Returns the record's offset in the data section.
    pub fn insert<T>(&mut self, network: IpNetwork, record: &T) -> Result<usize, MmdbError>
    where
        T: Serialize + ?Sized,
    {
        self.tree.check(network)?;
        let offset = self.data.insert(record)?;
        self.tree.insert(network, offset)?;
        debug!("inserted {network} -> data offset {offset}");
        Ok(offset)
    }

    /// Stores `record` for every address in `first..=last`.
    ///
    /// Returns the number of networks the range was split into.
    pub fn insert_range<T>(
        &mut self,
        first: IpAddr,
        last: IpAddr,
        record: &T,
    ) -> Result<usize, MmdbError>
    where
        T: Serialize + ?Sized,
    {
        let networks = self.tree.range_networks(first, last)?;
        let offset = self.data.insert(record)?;
        for network in &networks {
            self.tree.insert(*network, offset)?;
        }
        debug!(
            "inserted {first}-{last} as {} networks -> data offset {offset}",
            networks.len()
        );
        Ok(networks.len())
    }

    fn metadata(&self, node_count: u32) -> Metadata {
        Metadata {
            binary_format_major_version: 2,
            binary_format_minor_version: 0,
            build_epoch: self.options.build_epoch.unwrap_or_else(current_epoch),
            database_type: self.options.database_type.clone(),
            description: self.options.description.clone(),
            ip_version: self.options.ip_version.number(),
            languages: self.options.languages.clone(),
            node_count,
            record_size: self.options.record_size.bits(),
        }
    }

    /// Writes the complete database to `out`.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), MmdbError> {
        let (tree, node_count) = self.tree.write_nodes(self.options.record_size)?;
        let metadata = encoder::encode(&self.metadata(node_count))?;

        out.write_all(&tree)?;
        out.write_all(&[0; DATA_SECTION_SEPARATOR_SIZE])?;
        out.write_all(self.data.as_bytes())?;
        out.write_all(METADATA_START_MARKER)?;
        out.write_all(&metadata)?;
        out.flush()?;

        info!(
            "wrote {node_count} nodes, {} bytes of data, record size {}",
            self.data.len(),
            self.options.record_size.bits()
        );
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MmdbError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MmdbError> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))?;
        info!("saved {}", path.as_ref().display());
        Ok(())
    }
}
