//! Session integration tests.
//!
//! This module contains integration tests for the simulation session:
//! - Advancing, prediction, and correction
//! - Commands, signals, and contained faults
//! - Event reconciliation through the session
//! - Checksum recording and verification
//! - Instant replay snapshots and recorded replays

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Session test modules
mod sessions {
    pub mod checksums;
    pub mod events;
    pub mod faults;
    pub mod replay;
    pub mod simulation;
    pub mod snapshots;
}
