//! City-level geolocation records in the GeoIP2-City layout.
//!
//! [`GeoName`] is the flat form read from GeoNames-keyed CSV sources;
//! [`CityRecord`] is the nested form stored in the database, matching what
//! GeoIP2 City readers expect:
//!
//! ```json
//! {
//!   "country": { "iso_code": "US", "names": { "en": "United States" } },
//!   "subdivisions": [ { "names": { "en": "Texas" } } ],
//!   "city": { "names": { "en": "Austin" } },
//!   "location": { "latitude": 30.2672, "longitude": -97.7431 }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Language under which names are stored.
pub const LANGUAGE: &str = "en";

/// Flat description of a place.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoName {
    pub country_iso: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
}

impl GeoName {
    /// Placeholder for blocks whose location is not known.
    pub fn unknown() -> GeoName {
        GeoName {
            country_iso: "--".to_owned(),
            country: "Unknown".to_owned(),
            region: "Unknown".to_owned(),
            city: "Unknown".to_owned(),
            latitude: None,
            longitude: None,
        }
    }

    /// Returns a copy placed at the given coordinates.
    #[must_use]
    pub fn at(&self, latitude: Option<f32>, longitude: Option<f32>) -> GeoName {
        GeoName {
            latitude,
            longitude,
            ..self.clone()
        }
    }

    /// Builds the nested record stored in the database.
    ///
    /// Empty region and city names are left out, as is the location unless
    /// both coordinates are known.
    pub fn to_record(&self) -> CityRecord {
        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        };

        CityRecord {
            country: Country {
                iso_code: self.country_iso.clone(),
                names: names(&self.country),
            },
            subdivisions: if self.region.is_empty() {
                Vec::new()
            } else {
                vec![Names {
                    names: names(&self.region),
                }]
            },
            city: if self.city.is_empty() {
                None
            } else {
                Some(Names {
                    names: names(&self.city),
                })
            },
            location,
        }
    }
}

fn names(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LANGUAGE.to_owned(), name.to_owned())])
}

/// GeoIP2-City shaped record.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CityRecord {
    pub country: Country,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdivisions: Vec<Names>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<Names>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Country {
    pub iso_code: String,
    pub names: BTreeMap<String, String>,
}

/// A place known only by its localized names.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Names {
    pub names: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Location {
    pub latitude: f32,
    pub longitude: f32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn austin() -> GeoName {
        GeoName {
            country_iso: "US".to_owned(),
            country: "United States".to_owned(),
            region: "Texas".to_owned(),
            city: "Austin".to_owned(),
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn test_record_layout() {
        let record = austin().at(Some(30.5), Some(-97.75)).to_record();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "country": {"iso_code": "US", "names": {"en": "United States"}},
                "subdivisions": [{"names": {"en": "Texas"}}],
                "city": {"names": {"en": "Austin"}},
                "location": {"latitude": 30.5, "longitude": -97.75},
            })
        );
    }

    #[test]
    fn test_partial_record() {
        let mut geo = austin().at(Some(30.5), None);
        geo.region.clear();
        geo.city.clear();

        assert_eq!(
            serde_json::to_value(geo.to_record()).unwrap(),
            json!({"country": {"iso_code": "US", "names": {"en": "United States"}}})
        );
    }

    #[test]
    fn test_unknown_placeholder() {
        let record = GeoName::unknown().to_record();
        assert_eq!(record.country.iso_code, "--");
        assert_eq!(record.city.unwrap().names[LANGUAGE], "Unknown");
        assert!(record.location.is_none());
    }
}
