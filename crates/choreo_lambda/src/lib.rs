//! AWS-oriented platform adapters for workflow choreography.
//!
//! This crate owns runtime integration details: the staging and dispatch
//! contracts with their S3, Lambda, SQS and HTTP backends, the choreography
//! sequence every deployed function runs, and one handler per trigger type.
//! Descriptor and contract primitives come from `choreo_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod runtime;
