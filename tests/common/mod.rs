//! Common test utilities for all integration tests.
//!
//! Provides isolated pools, a call-counting provider and stand-in schema
//! installers for exercising the harness end to end.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

pub mod fakes;
pub mod test_pool;
