//! Trade-feed HTTP adapter.

pub mod client;

pub use client::HttpTradeFeed;
