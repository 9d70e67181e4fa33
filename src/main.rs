//! Binary entry point for `edictl`.
//!
//! The command driver lives in `edictl::runtime`; this binary only installs
//! logging and delegates.

use anyhow::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    edictl::logging::init();
    edictl::runtime::run().await
}
