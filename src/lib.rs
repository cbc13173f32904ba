//! IBeanThere café finder library
//!
//! Nearby-café search backed by a spatial result cache. The modules are
//! exposed for the `beanthere` binary and for integration tests.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod data;
pub mod geo;
pub mod search;
