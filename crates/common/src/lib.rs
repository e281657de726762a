//! Common utilities and types shared across media control-plane components.

#![warn(clippy::pedantic)]

/// Module for wire-level error codes shared by every transport
pub mod error;

/// Module for identifier types
pub mod types;

/// Module for common configuration
pub mod config;
