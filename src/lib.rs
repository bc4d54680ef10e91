//! Library crate for tunnel-scan-rs exposing the lifecycle controller and its collaborators.
pub mod client;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod operator;
pub mod platform;
pub mod probe;
pub mod settings;
pub mod signals;
pub mod tunnel;
pub mod types;
