//! Error types for cmix-primitives.

use thiserror::Error;

/// Result type for cmix-primitives operations.
pub type Result<T> = std::result::Result<T, PrimitivesError>;

/// Errors that can occur while decoding round primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimitivesError {
    /// A wire state value outside the known lifecycle.
    #[error("unknown round state: {0}")]
    UnknownState(u32),
}
