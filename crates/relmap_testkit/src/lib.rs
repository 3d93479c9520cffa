//! # Relmap Testkit
//!
//! Test utilities for Relmap.
//!
//! This crate provides:
//! - The shop fixture: customers, orders and groups on an in-memory backend
//! - Tracing setup for tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use relmap_testkit::prelude::*;
//!
//! let shop = ShopFixture::new();
//! let bob = shop.repo.get("Customer", 1).unwrap();
//! assert_eq!(shop.queries(), 1);
//! # drop(bob);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
