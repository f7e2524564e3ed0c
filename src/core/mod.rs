//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Locking and backend error types
//! - [`time`] - Timestamps and injectable time sources
//! - [`backend_op`] - Time-bounded, retrying store calls

pub mod backend_op;
pub mod config;
pub mod error;
pub mod time;
