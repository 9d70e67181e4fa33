//! Build script for man page generation.
//!
//! Generates a man page for the `edictl` binary using `clap_mangen`. The CLI
//! definitions come from the `cli-defs` crate so the page and the parser
//! cannot drift apart.

use std::{env, fs, io, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;
use cli_defs::Cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=cli-defs");

    let Ok(out_dir) = env::var("OUT_DIR").map(PathBuf::from) else {
        // Not set for IDE analysis runs.
        return Ok(());
    };

    let man = Man::new(Cli::command());
    let mut file = fs::File::create(out_dir.join("edictl.1"))?;
    man.render(&mut file)?;

    Ok(())
}
