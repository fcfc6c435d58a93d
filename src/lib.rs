#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod collectors;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod server;
