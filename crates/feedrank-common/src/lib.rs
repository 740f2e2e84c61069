//! FeedRank Common - Shared types and utilities
//!
//! This crate provides the identifiers, cache records, configuration and
//! error definitions used across all FeedRank components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
