//! Blockchain JSON-RPC adapter.

pub mod client;

pub use client::JsonRpcClient;
