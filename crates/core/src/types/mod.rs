//! Core types for Starshop.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod stars;
pub mod status;

pub use id::*;
pub use stars::{StarAmount, StarRate, StarRateError, STARS_CURRENCY};
pub use status::*;
