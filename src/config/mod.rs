//! Configuration constants for the storage engine.
//!
//! All layout and fan-out constants live in [`constants`]; import them from
//! here rather than redefining them locally:
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, LEAF_MAX_KEYS};
//! ```

mod constants;

pub use constants::*;
