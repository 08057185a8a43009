// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Error types for testagent core operations.

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or validating shared state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
