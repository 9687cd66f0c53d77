//! Library crate for reach-diag: network reachability probes and failure diagnosis.
pub mod config;
pub mod connectivity;
pub mod diagnosis;
pub mod dns_records;
pub mod error;
pub mod http_probe;
pub mod ports;
pub mod probe;
pub mod public_ip;
pub mod resolver;
pub mod scanner;
pub mod server;
pub mod types;
