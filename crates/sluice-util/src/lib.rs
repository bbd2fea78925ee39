#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem helpers shared by the sluice crates.
//!
//! Nothing here logs; callers decide what is worth reporting.

pub mod fs;
