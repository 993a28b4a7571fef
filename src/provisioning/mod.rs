//! # Database Provisioning
//!
//! The pool of pre-built databases fixtures attach to, the background
//! builders that keep it full, and the lazily created process-wide instance.

pub mod global;
pub mod manager;
mod worker;

pub use global::{shared_pool, shared_pool_if_started, LazyPool};
pub use manager::{DatabaseProvider, PoolManager, PoolStats};
