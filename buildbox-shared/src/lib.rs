//! Buildbox shared - error taxonomy and constants
//!
//! This crate contains the types used by both the provisioning core
//! (buildbox) and the test utilities that stand in for a backend daemon.

pub mod constants;
pub mod errors;

pub use errors::{BuildboxError, BuildboxResult};
