//! Starshop Core - Shared types library.
//!
//! This crate provides common types used across all Starshop components:
//! - `server` - Mini App API, Telegram webhook and bot handlers
//! - `cli` - Command-line tools for migrations and development
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, order/message statuses and Telegram Stars amounts

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
