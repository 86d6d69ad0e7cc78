//! Core library for the `hperf` CLI.
//!
//! This crate provides the building blocks used by the binary: the agent
//! (HTTP data endpoints plus the control WebSocket and its test runners),
//! the controller client that fans commands out across a fleet, the shared
//! control-plane signal types, and the analysis passes over collected data
//! points. The primary user-facing interface is the `hperf` command-line
//! application.
pub mod agent;
pub mod args;
pub mod client;
pub mod control;
pub mod error;
pub mod logger;
