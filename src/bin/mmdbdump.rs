use std::env;
use std::error::Error;
use std::io;

use mmdbdump::{dump_all, DumpConfig};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // Labels stay colored when piped; NO_COLOR still turns them off.
    if env::var_os("NO_COLOR").is_none() {
        colored::control::set_override(true);
    }

    dump_all(&mut io::stdout().lock(), &DumpConfig::default())?;
    Ok(())
}
