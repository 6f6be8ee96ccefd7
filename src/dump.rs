//! Dump one lookup per database as colorized, pretty-printed JSON.
//!
//! Each database produces one block:
//!
//! ```text
//! GeoLite2-City.mmdb            <- bold red
//! ------------------------------------------------------------------------
//! {
//!   "city": { ... }
//! }
//!
//! ```
//!
//! Addresses without a record print as `null`.

use std::fmt;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use colored::Colorize;
use log::{debug, info};
use maxminddb::Reader;
use serde::de::{self, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::MmdbError;

/// Databases dumped when nothing else is configured, in output order.
pub const DEFAULT_DATABASES: [&str; 2] = ["GeoLite2-City.mmdb", "Singular.mmdb"];

/// Address looked up when nothing else is configured.
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(70, 114, 203, 247));

/// Width of the rule printed under each label.
pub const RULE_WIDTH: usize = 72;

/// A database file and the label printed above its lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTarget {
    pub path: PathBuf,
    pub label: String,
}

impl DumpTarget {
    /// Labels the target with the file name of `path`.
    pub fn new(path: impl Into<PathBuf>) -> DumpTarget {
        let path = path.into();
        let label = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => path.display().to_string(),
        };
        DumpTarget { path, label }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpConfig {
    pub targets: Vec<DumpTarget>,
    pub address: IpAddr,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            targets: DEFAULT_DATABASES.into_iter().map(DumpTarget::new).collect(),
            address: DEFAULT_ADDRESS,
        }
    }
}

// Any MaxMind DB value as JSON. Byte strings become arrays of numbers and
// uint128 values keep their full precision.
struct JsonRecord(Value);

impl<'de> Deserialize<'de> for JsonRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(JsonRecordVisitor).map(JsonRecord)
    }
}

struct JsonRecordVisitor;

impl<'de> Visitor<'de> for JsonRecordVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a MaxMind DB value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(v.into())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(v.into())
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        Value::deserialize(v.into_deserializer())
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Value, E> {
        Value::deserialize(v.into_deserializer())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(v.into())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Array(v.iter().map(|&b| Value::from(b)).collect()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        JsonRecord::deserialize(deserializer).map(|record| record.0)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(JsonRecord(value)) = seq.next_element()? {
            values.push(value);
        }
        Ok(Value::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut values = Map::new();
        while let Some((key, JsonRecord(value))) = map.next_entry::<String, JsonRecord>()? {
            values.insert(key, value);
        }
        Ok(Value::Object(values))
    }
}

/// Looks up `address` and decodes whatever record it maps to.
///
/// Returns `Ok(None)` when the database has no record for the address.
pub fn lookup_value<S: AsRef<[u8]>>(
    reader: &Reader<S>,
    address: IpAddr,
) -> Result<Option<Value>, MmdbError> {
    let result = reader.lookup(address)?;
    let value = result.decode::<JsonRecord>()?.map(|record| record.0);
    debug!(
        "lookup {address}: {}",
        if value.is_some() { "found" } else { "no record" }
    );
    Ok(value)
}

/// Formats one output block: label, rule, JSON body and a blank line.
pub fn render_block(label: &str, value: Option<&Value>) -> Result<String, MmdbError> {
    let body = serde_json::to_string_pretty(&value)?;
    Ok(format!(
        "{}\n{}\n{}\n\n",
        label.red().bold(),
        "-".repeat(RULE_WIDTH),
        body
    ))
}

/// Opens one database, looks up `address` and writes its block to `out`.
///
/// Nothing is written when the database cannot be opened.
pub fn dump_target<W: Write>(
    out: &mut W,
    target: &DumpTarget,
    address: IpAddr,
) -> Result<(), MmdbError> {
    #[cfg(not(feature = "mmap"))]
    let reader = Reader::open_readfile(&target.path)?;
    #[cfg(feature = "mmap")]
    let reader = Reader::open_mmap(&target.path)?;

    info!(
        "opened {} ({}, {} nodes)",
        target.path.display(),
        reader.metadata.database_type,
        reader.metadata.node_count
    );

    let value = lookup_value(&reader, address)?;
    out.write_all(render_block(&target.label, value.as_ref())?.as_bytes())?;
    Ok(())
}

/// Dumps every configured target in order, stopping at the first failure.
pub fn dump_all<W: Write>(out: &mut W, config: &DumpConfig) -> Result<(), MmdbError> {
    for target in &config.targets {
        dump_target(out, target, config.address)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = DumpConfig::default();
        assert_eq!(config.address, "70.114.203.247".parse::<IpAddr>().unwrap());
        assert_eq!(
            config
                .targets
                .iter()
                .map(|t| t.label.as_str())
                .collect::<Vec<_>>(),
            vec!["GeoLite2-City.mmdb", "Singular.mmdb"]
        );
    }

    #[test]
    fn test_target_label_is_file_name() {
        let target = DumpTarget::new("/var/lib/GeoIP/GeoLite2-City.mmdb");
        assert_eq!(target.label, "GeoLite2-City.mmdb");
        assert_eq!(target.path, PathBuf::from("/var/lib/GeoIP/GeoLite2-City.mmdb"));

        let target = DumpTarget::new("/");
        assert_eq!(target.label, "/");
    }

    #[test]
    fn test_render_block() {
        colored::control::set_override(true);

        let value = json!({"city": "Testville", "country": "XX"});
        let block = render_block("test.mmdb", Some(&value)).unwrap();
        let expected = format!(
            "\x1b[1;31mtest.mmdb\x1b[0m\n{}\n{{\n  \"city\": \"Testville\",\n  \"country\": \"XX\"\n}}\n\n",
            "-".repeat(72)
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn test_render_absent_value() {
        colored::control::set_override(true);

        let block = render_block("test.mmdb", None).unwrap();
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "-".repeat(RULE_WIDTH));
        assert_eq!(lines[2], "null");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn test_render_keeps_non_ascii() {
        colored::control::set_override(true);

        let value = json!({"city": {"names": {"ja": "リンシェーピング", "en": "Linköping"}}});
        let block = render_block("test.mmdb", Some(&value)).unwrap();
        assert!(block.contains("\"ja\": \"リンシェーピング\""));
        assert!(block.contains("\"en\": \"Linköping\""));

        // Stored key order is kept.
        assert!(block.find("\"ja\"").unwrap() < block.find("\"en\"").unwrap());
    }
}
