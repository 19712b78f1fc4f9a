// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Caching and resolution layer between scene-graph nodes and business
//! instances.
//!
//! Mappings are served by a remote backend over paginated, size-limited
//! calls and are immutable for the lifetime of a viewing session, so every
//! fetch here is memoized: per-id tables store the in-flight future itself
//! (request coalescing), full-model listings are memoized whole, and ids
//! without a backend match are memoized as explicit empty results.
//!
//! [`UnifiedMappingCache`] is the entry point; it composes the classic
//! (numeric-id) and DM (namespaced-id) sub-caches.

pub mod backend;
pub mod classic;
pub mod config;
pub mod dm;
pub mod error;
pub mod memo;
pub mod nodes;
pub mod unified;

pub use backend::{
    HttpBackendConfig, HttpMappingBackend, InstanceInspection, MappingBackend, MappingFilter, Page,
};
pub use classic::{ClassicMappingCache, NodeAssetMappingResult};
pub use config::CacheConfig;
pub use dm::{
    ClosestParentLookup, DmAncestorMatch, DmMappingCache, DmModelConnections, InstanceViewMap,
};
pub use error::{MappingError, Result};
pub use memo::{MemoTable, SharedSlot};
pub use nodes::CadNodeCache;
pub use unified::{
    InstanceNodeMap, InstanceTreeIndexMap, ModelInstanceNodeMap, ModelInstanceTreeIndexMap,
    UnifiedMappingCache,
};
