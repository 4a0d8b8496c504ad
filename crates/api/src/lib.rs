//! # Tradewatch API
//!
//! Application layer - wiring and the daemon entry point.
//!
//! This crate contains:
//! - The application context (dependency injection)
//! - The default item processor wired at the processing seam
//! - The daemon binary
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - Wires up the hexagonal architecture: one protection gateway per
//!   dependency, repositories as ports, one worker per source

pub mod context;
pub mod processor;

// Re-export for convenience
pub use context::{AppContext, ProtectionStats};
pub use processor::AuditProcessor;
