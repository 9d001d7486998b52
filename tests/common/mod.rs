// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Common test utilities and fixtures shared across test targets
//!
//! Provides ControlPlane builders, manifest helpers, and in-memory fakes for
//! the cluster, the ControlPlane API, the renderer and the hooks.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[path = "../common/mod.rs"]
//! mod common;
//! use common::*;
//! ```

mod fakes;

pub use fakes::*;
pub use fixtures::*;
