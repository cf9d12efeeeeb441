//! Common test utilities for strata-update
//!
//! - Fakes for the source control and system manager seams
//! - Test hooks for failure and interleaving scenarios
//! - Temp-dir installations and git fixture repositories

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
