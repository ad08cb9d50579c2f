//! Lode server library: configuration, logging, and the JSON-RPC
//! query surface over the history store.

pub mod config;
pub mod logging;
pub mod rpc;
pub mod tools;
