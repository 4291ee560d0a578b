//! # Scheduler Testing Utils
//!
//! Shared testing utilities for the labourer task scheduler.
//! This crate provides recording mocks for the storage, invocation and
//! ecology traits, a manually driven clock, and builders for test data.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use scheduler_testing_utils::mocks::*;
//! use scheduler_testing_utils::builders::LabourerBuilder;
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
