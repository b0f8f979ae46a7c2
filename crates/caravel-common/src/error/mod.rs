//! Error handling for Caravel.
//!
//! This module provides a unified error type and result alias used
//! across all Caravel components.

mod write;

pub use write::{CaravelError, ErrorCode};

/// Result type alias for Caravel operations.
pub type CaravelResult<T> = std::result::Result<T, CaravelError>;
