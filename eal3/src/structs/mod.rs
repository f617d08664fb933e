//! Data structures representing format components.
//!
//! Contains the MPEG Layer III constants and header layout, the granule and
//! frame records exchanged between codecs and the frame synthesizer, the bit
//! reservoir used while decomposing MP3 input, and container blocks.

pub mod block;
pub mod granule;
pub mod mpeg;
pub mod reservoir;
