//! tirc - IRC over Tor with end-to-end encrypted private messages
//!
//! This library provides the pieces of the chat client:
//! - SOCKS5-tunneled transport with a restricted TLS cipher list
//! - Concurrent read/write pipeline with inline keepalive handling
//! - Per-peer encrypted session overlay with trust-on-first-use fingerprints
//! - Shared-secret peer authentication

pub mod client;

pub use client::{ClientConfig, ClientContext, TircCli};
