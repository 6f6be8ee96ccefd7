//! Error types for dumping and writing MaxMind DB files.

use std::fmt::Display;
use std::io;

use ipnetwork::IpNetworkError;
use maxminddb::MaxMindDbError;
use serde::ser;
use thiserror::Error;

/// Error returned by dump and writer operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MmdbError {
    /// An I/O error occurred while reading input or writing output.
    #[error("i/o error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),

    /// The database could not be opened or a lookup failed.
    #[error("database error: {0}")]
    Database(
        #[from]
        #[source]
        MaxMindDbError,
    ),

    /// A value cannot be represented in the MaxMind DB data format.
    #[error("{}", format_encoding_error(.message, .offset))]
    Encoding {
        /// Description of what could not be encoded.
        message: String,
        /// Offset in the data section being written, when known.
        offset: Option<usize>,
    },

    /// The provided input is invalid for this operation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what is invalid about the input.
        message: String,
    },

    /// The provided network/CIDR is invalid.
    #[error("invalid network: {0}")]
    InvalidNetwork(
        #[from]
        #[source]
        IpNetworkError,
    ),

    /// A CSV source could not be parsed.
    #[error("csv error: {0}")]
    Csv(
        #[from]
        #[source]
        csv::Error,
    ),

    /// A lookup result could not be rendered as JSON.
    #[error("json error: {0}")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),
}

fn format_encoding_error(message: &str, offset: &Option<usize>) -> String {
    match offset {
        Some(off) => format!("encoding error at offset {off}: {message}"),
        None => format!("encoding error: {message}"),
    }
}

impl MmdbError {
    /// Creates an Encoding error with just a message.
    pub fn encoding(message: impl Into<String>) -> Self {
        MmdbError::Encoding {
            message: message.into(),
            offset: None,
        }
    }

    /// Creates an Encoding error with message and offset.
    pub fn encoding_at(message: impl Into<String>, offset: usize) -> Self {
        MmdbError::Encoding {
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// Creates an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        MmdbError::InvalidInput {
            message: message.into(),
        }
    }
}

impl ser::Error for MmdbError {
    fn custom<T: Display>(msg: T) -> Self {
        MmdbError::encoding(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", MmdbError::encoding("map keys must be strings")),
            "encoding error: map keys must be strings".to_owned(),
        );
        assert_eq!(
            format!("{}", MmdbError::encoding_at("string too long", 42)),
            "encoding error at offset 42: string too long".to_owned(),
        );

        let io_err = Error::new(ErrorKind::NotFound, "file not found");
        assert_eq!(
            format!("{}", MmdbError::from(io_err)),
            "i/o error: file not found".to_owned(),
        );

        let db_err = MaxMindDbError::invalid_database("could not find MaxMind DB metadata in file");
        assert_eq!(
            format!("{}", MmdbError::from(db_err)),
            "database error: invalid database: could not find MaxMind DB metadata in file"
                .to_owned(),
        );

        let net_err = IpNetworkError::InvalidPrefix;
        assert_eq!(
            format!("{}", MmdbError::from(net_err)),
            "invalid network: invalid prefix".to_owned(),
        );

        assert_eq!(
            format!("{}", MmdbError::invalid_input("not an IPv4 block")),
            "invalid input: not an IPv4 block".to_owned(),
        );
    }

    #[test]
    fn test_custom_serializer_error() {
        let err = <MmdbError as ser::Error>::custom("unsupported value");
        assert!(matches!(err, MmdbError::Encoding { offset: None, .. }));
    }
}
