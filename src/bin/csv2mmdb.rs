use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};

use mmdbdump::import::{import_blocks, read_locations};
use mmdbdump::{IpVersion, RecordSize, Writer, WriterOptions};

/// Build a MaxMind DB file from GeoLite2 City CSV files.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Database file to write
    #[arg(long, default_value = "Singular.mmdb")]
    mmdb: PathBuf,

    /// GeoLite2 City blocks CSV file
    #[arg(long)]
    csv: PathBuf,

    /// GeoLite2 City locations CSV file
    #[arg(long)]
    geo: PathBuf,

    /// Search tree record size in bits (24, 28 or 32)
    #[arg(long, default_value_t = 28)]
    record_size: u16,

    /// IP version of the search tree (4 or 6)
    #[arg(long, default_value_t = 4)]
    ip_version: u16,

    /// Log progress
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    let options = WriterOptions {
        ip_version: IpVersion::try_from(args.ip_version)?,
        record_size: RecordSize::try_from(args.record_size)?,
        ..WriterOptions::default()
    };

    let locations = read_locations(File::open(&args.geo)?)?;
    let mut writer = Writer::new(options);
    let count = import_blocks(File::open(&args.csv)?, &locations, &mut writer)?;
    writer.write_file(&args.mmdb)?;

    info!("wrote {count} networks to {}", args.mmdb.display());
    Ok(())
}
