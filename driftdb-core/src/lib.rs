//! Core types and traits for DriftDB
//!
//! This crate contains the fundamental types and error handling used
//! throughout the DriftDB project. It provides:
//!
//! - Common error types with [`Error`] and [`Result`]
//! - Basic data types like [`NodeId`], [`Status`], and [`VersionedValue`]
//! - Version vectors ([`vclock::Version`]) with happens-before comparison
//!
//! # Example
//!
//! ```
//! use driftdb_core::vclock::{Causality, Version};
//!
//! let mut a = Version::new();
//! a.increment(1);
//!
//! let mut b = a.clone();
//! b.increment(2);
//!
//! assert_eq!(a.compare(&b), Causality::Before);
//! assert_eq!(b.encode(), "1:1;2:1");
//! ```

pub mod error;
pub mod types;
pub mod vclock;

pub use error::{Error, Result};
pub use types::*;
