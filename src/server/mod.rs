//! HTTP serving side: router assembly and per-client stream writers

mod client;
mod config;
mod router;

pub use config::ServerConfig;
pub use router::build;
