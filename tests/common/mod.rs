//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: a small deterministic game (config, components, systems)
//! - `test_utils`: session builders and input feeding helpers
//!
//! # Usage
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::stubs::{StubConfig, StubInput};
//! use common::{confirm_all, stub_session};
//! ```

pub mod stubs;
pub mod test_utils;

#[allow(unused_imports)]
pub use test_utils::{
    collect_events, confirm_all, confirm_tick, run_confirmed, stub_builder, stub_session,
    PLAYERS,
};
