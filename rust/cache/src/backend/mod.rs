// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote mapping backend interface.
//!
//! The caches talk to the backend exclusively through [`MappingBackend`], so
//! tests can drive them against an in-memory fake. [`HttpMappingBackend`] is
//! the production implementation.

use async_trait::async_trait;
use cadmap_core::{
    CadNode, DmConnection, ModelRevisionId, NamespacedInstanceId, NodeId, RawAssetMapping,
    TreeIndex, ViewRef,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod http;

pub use http::{HttpBackendConfig, HttpMappingBackend};

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Filter for the classic asset-mapping listing endpoint.
///
/// Id filters are capped at 1000 ids per request by the caller; the cache
/// layer chunks larger sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingFilter {
    /// No filter: the full listing for a model revision.
    All,
    InstanceIds(Vec<u64>),
    NodeIds(Vec<NodeId>),
}

/// Views satisfied by one inspected DM instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInspection {
    pub instance: NamespacedInstanceId,
    pub views: Vec<ViewRef>,
}

/// The two logical endpoints of the remote mapping backend, plus the node
/// descriptor lookups the caches need to turn mapping records into
/// [`CadNode`]s.
#[async_trait]
pub trait MappingBackend: Send + Sync {
    /// One page of the classic asset-mapping listing for a model revision.
    async fn filter_asset_mappings(
        &self,
        model: ModelRevisionId,
        filter: &MappingFilter,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<RawAssetMapping>>;

    /// Node descriptors for the given node ids.
    async fn nodes_by_ids(
        &self,
        model: ModelRevisionId,
        node_ids: &[NodeId],
    ) -> Result<Vec<CadNode>>;

    /// Node descriptors for the given tree indexes.
    async fn nodes_by_tree_indexes(
        &self,
        model: ModelRevisionId,
        tree_indexes: &[TreeIndex],
    ) -> Result<Vec<CadNode>>;

    /// Leaf-first ancestor chain of the node at `tree_index`, supplied by
    /// the scene-graph host.
    async fn ancestor_nodes(
        &self,
        model: ModelRevisionId,
        tree_index: TreeIndex,
    ) -> Result<Vec<CadNode>>;

    /// One page of the DM connection listing. Accepts multiple model
    /// revisions per call; `instances` narrows the result when present.
    async fn filter_dm_connections(
        &self,
        models: &[ModelRevisionId],
        instances: Option<&[NamespacedInstanceId]>,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<DmConnection>>;

    /// Views satisfied by the given DM instances.
    async fn inspect_instances(
        &self,
        instances: &[NamespacedInstanceId],
    ) -> Result<Vec<InstanceInspection>>;
}
