//! Import of GeoLite2 City CSV exports.
//!
//! Two files are involved: the locations file, keyed by GeoNames id, and the
//! blocks file, mapping networks to those ids. Only the columns used to build
//! a [`CityRecord`](crate::geoname::CityRecord) are read; the rest are
//! ignored.

use std::collections::HashMap;
use std::io;

use ipnetwork::IpNetwork;
use log::{info, warn};
use serde::Deserialize;

use crate::error::MmdbError;
use crate::geoname::GeoName;
use crate::writer::Writer;

/// Id under which the unknown-location placeholder is registered.
pub const UNKNOWN_GEONAME_ID: i64 = -1;

#[derive(Debug, Deserialize)]
struct LocationRow {
    geoname_id: i64,
    country_iso_code: String,
    country_name: String,
    subdivision_1_name: String,
    city_name: String,
}

#[derive(Debug, Deserialize)]
struct BlockRow {
    network: String,
    geoname_id: String,
    registered_country_geoname_id: String,
    latitude: String,
    longitude: String,
}

/// Reads a GeoLite2 City locations CSV into a table keyed by GeoNames id.
///
/// The table also holds [`GeoName::unknown`] under [`UNKNOWN_GEONAME_ID`].
pub fn read_locations<R: io::Read>(source: R) -> Result<HashMap<i64, GeoName>, MmdbError> {
    let mut reader = csv::Reader::from_reader(source);
    let mut locations = HashMap::new();

    for row in reader.deserialize() {
        let row: LocationRow = row?;
        locations.insert(
            row.geoname_id,
            GeoName {
                country_iso: row.country_iso_code,
                country: row.country_name,
                region: row.subdivision_1_name,
                city: row.city_name,
                latitude: None,
                longitude: None,
            },
        );
    }
    info!("read {} locations", locations.len());

    locations.insert(UNKNOWN_GEONAME_ID, GeoName::unknown());
    Ok(locations)
}

fn block_geoname_id(row: &BlockRow) -> i64 {
    let id = if row.geoname_id.is_empty() {
        &row.registered_country_geoname_id
    } else {
        &row.geoname_id
    };

    match id.parse() {
        Ok(id) => id,
        Err(e) => {
            if !row.geoname_id.is_empty() {
                warn!("could not read geoname_id for {}: {e}", row.network);
            }
            UNKNOWN_GEONAME_ID
        }
    }
}

/// Inserts every block of a GeoLite2 City blocks CSV into `writer`.
///
/// Blocks without a city fall back to their registered country, then to the
/// unknown placeholder. Coordinates are taken from the block row. Returns the
/// number of blocks inserted.
pub fn import_blocks<R: io::Read>(
    source: R,
    locations: &HashMap<i64, GeoName>,
    writer: &mut Writer,
) -> Result<usize, MmdbError> {
    let mut reader = csv::Reader::from_reader(source);
    let mut count = 0_usize;

    for row in reader.deserialize() {
        let row: BlockRow = row?;
        let network: IpNetwork = row.network.parse()?;

        let id = block_geoname_id(&row);
        let geoname = locations.get(&id).ok_or_else(|| {
            MmdbError::invalid_input(format!("unknown geoname {id} for block {network}"))
        })?;

        let located = geoname.at(row.latitude.parse().ok(), row.longitude.parse().ok());
        writer.insert(network, &located.to_record())?;
        count += 1;
    }

    info!("imported {count} blocks");
    Ok(count)
}
