//! Deterministic workflow choreography primitives.
//!
//! This crate owns the workflow descriptor, step selection and advancement,
//! and the invocation contract carried between hops. It intentionally excludes
//! AWS SDK and Lambda runtime concerns, which live in `choreo_lambda`.

pub mod contract;
pub mod fingerprint;
pub mod staging_keys;
pub mod workflow;
