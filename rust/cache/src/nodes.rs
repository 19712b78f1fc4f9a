// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chunked, memoized scene-graph node descriptor lookups.

use cadmap_core::{model_node_key, CadNode, ModelNodeIdKey, ModelRevisionId, NodeId};
use futures::future::FutureExt;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::backend::MappingBackend;
use crate::error::Result;
use crate::memo::MemoTable;

/// Per-node-id cache of [`CadNode`] descriptors.
///
/// Node ids that the backend does not know are memoized as `None` so they
/// are never refetched.
pub struct CadNodeCache {
    backend: Arc<dyn MappingBackend>,
    chunk_size: usize,
    by_node_id: Arc<MemoTable<ModelNodeIdKey, Option<CadNode>>>,
}

impl CadNodeCache {
    pub fn new(backend: Arc<dyn MappingBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size,
            by_node_id: Arc::new(MemoTable::new()),
        }
    }

    /// Resolve descriptors for `node_ids`, fetching unseen ids in chunks.
    pub async fn nodes_for_node_ids(
        &self,
        model: ModelRevisionId,
        node_ids: &[NodeId],
    ) -> Result<FxHashMap<NodeId, CadNode>> {
        let keys: Vec<ModelNodeIdKey> = node_ids
            .iter()
            .map(|&id| model_node_key(model, id))
            .collect();

        let backend = Arc::clone(&self.backend);
        let chunk_size = self.chunk_size;
        let resolved = self
            .by_node_id
            .resolve_many(keys, None, move |claimed| {
                async move {
                    tracing::debug!(
                        model_id = model.model_id,
                        revision_id = model.revision_id,
                        count = claimed.len(),
                        "Fetching node descriptors"
                    );
                    let ids: Vec<NodeId> = claimed.iter().map(|key| key.1).collect();
                    let mut fetched = FxHashMap::default();
                    for chunk in ids.chunks(chunk_size) {
                        let nodes = backend.nodes_by_ids(model, chunk).await?;
                        for node in nodes {
                            fetched.insert(model_node_key(model, node.id), Some(node));
                        }
                    }
                    Ok(fetched)
                }
                .boxed()
            })
            .await?;

        Ok(resolved
            .into_iter()
            .filter_map(|(key, node)| node.map(|n| (key.1, n)))
            .collect())
    }

    /// Warm the cache for `node_ids` ahead of time, discarding the result.
    pub async fn warm_nodes(&self, model: ModelRevisionId, node_ids: &[NodeId]) -> Result<()> {
        self.nodes_for_node_ids(model, node_ids).await.map(|_| ())
    }
}
