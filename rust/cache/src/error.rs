// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the mapping cache.

use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// The enum is `Clone` (string payloads only) so one failed in-flight fetch
/// can be handed to every coalesced waiter of the same memo entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("ancestor chain is not ordered leaf-first: {0}")]
    AncestorOrder(String),
}

/// Result alias used across the cache.
pub type Result<T> = std::result::Result<T, MappingError>;

impl From<reqwest::Error> for MappingError {
    fn from(err: reqwest::Error) -> Self {
        MappingError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Decode(err.to_string())
    }
}
