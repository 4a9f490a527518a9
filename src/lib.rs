//! certbox - sandbox configurations for web services that need personal
//! certificates and legacy security plugins.
//!
//! This crate provides:
//! - A versioned service catalog reader
//! - Certificate/private-key discovery and pairing on the local filesystem
//! - Sandbox spec construction and rendering for an external isolation engine
//! - The orchestration that ties those together, plus the `certbox` CLI

pub mod catalog;
pub mod certs;
pub mod cli;
pub mod config;
pub mod paths;
pub mod sandbox;
pub mod spec;
pub mod startup;

pub use config::Config;
