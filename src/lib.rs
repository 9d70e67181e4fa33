//! Core library for the `edictl` EDIFACT pipeline.
//!
//! Documents move through sibling state directories (generated, ready,
//! sent, failed, archive) and are delivered to a receiver over MLLP, with
//! plain TCP or TLS, under a bounded retry policy. The binary is a thin
//! wrapper around [`runtime::run`].

pub mod delivery;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod settings;
pub mod transport;
pub mod validate;
