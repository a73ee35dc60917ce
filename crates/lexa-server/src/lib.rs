//! Lexa server: configuration, the HTTP upstream adapter and the nightly
//! refresh schedule. The `lexa-server` binary wires them to the API router.

pub mod config;
pub mod scheduler;
pub mod upstream;

pub use config::ServerConfig;
pub use upstream::HttpUpstream;
