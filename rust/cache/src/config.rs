// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cache tuning knobs, loadable from environment variables.

/// Tuning parameters for the mapping caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum ids per classic filter request (the backend's documented cap).
    pub chunk_size: usize,
    /// Page size for cursor-paginated listings.
    pub page_limit: u32,
    /// Concurrently in-flight per-model queries in the unified cache.
    pub max_concurrent_requests: usize,
    /// Model revisions per DM listing request.
    pub dm_model_batch_size: usize,
}

impl CacheConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on missing or unparsable values.
    pub fn from_env() -> Self {
        Self {
            chunk_size: std::env::var("MAPPING_CHUNK_SIZE")
                .unwrap_or_else(|_| "1000".into())
                .parse()
                .unwrap_or(1000),
            page_limit: std::env::var("MAPPING_PAGE_LIMIT")
                .unwrap_or_else(|_| "1000".into())
                .parse()
                .unwrap_or(1000),
            max_concurrent_requests: std::env::var("MAPPING_MAX_CONCURRENT")
                .unwrap_or_else(|_| "2".into())
                .parse()
                .unwrap_or(2),
            dm_model_batch_size: std::env::var("MAPPING_DM_MODEL_BATCH")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            page_limit: 1000,
            max_concurrent_requests: 2,
            dm_model_batch_size: 10,
        }
    }
}
