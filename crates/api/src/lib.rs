//! Admin HTTP API and process wiring for the tracklane runner.

pub mod app;
pub mod config;
