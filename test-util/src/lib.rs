//! Utilities for integration tests.
//!
//! The `test-util` crate provides a scripted loopback MLLP receiver used by
//! the transport and pipeline integration suites in the main crate.

pub mod server;

pub use server::{AckServer, Reply};

/// Boxed error type used by test helpers.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A structurally valid EDIFACT interchange carrying `tag` in its BGM segment.
#[must_use]
pub fn edifact_document(tag: &str) -> String {
    format!(
        "UNA:+.? '\nUNB+UNOA:1+SENDER+RECEIVER+240101:1200+REF1'\nUNH+1+ORDERS:D:96A:UN'\nBGM+220+{tag}+9'\nUNT+3+1'\nUNZ+1+REF1'\n"
    )
}
