//! Orbital Fuzz Harness
//!
//! Property-based testing support shared by the planner crates: orbital
//! domain strategies (angles, elevation series, observers, mean elements,
//! rendered and damaged element records), a seeded runner and named
//! parser fuzz targets.
//!
//! # Usage
//!
//! ```rust
//! use fuzz_harness::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn raans_in_range(raans in angle_set(1..20)) {
//!         prop_assert!(raans.iter().all(|r| *r < 360.0));
//!     }
//! }
//! ```

pub mod generators;
pub mod runner;
pub mod targets;

pub mod prelude {
    pub use crate::generators::*;
    pub use crate::runner::{FuzzConfig, FuzzFailure, FuzzResult, FuzzRunner};
    pub use proptest::prelude::*;
}

pub use proptest;
