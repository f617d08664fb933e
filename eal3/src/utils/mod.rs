//! Utility functions and supporting infrastructure.
//!
//! Provides the bit-addressable stream used by every codec and the error
//! types shared across the crate.

pub mod bitstream;
pub mod errors;
