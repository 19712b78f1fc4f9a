// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Classic (numeric-id) asset mapping sub-cache.
//!
//! Caches mappings between classic instance ids and CAD nodes for one model
//! revision at a time, bidirectionally indexed: every fetched mapping is
//! memoized both under its instance key and under its node id, so a later
//! lookup from the other side is free. Ids the backend has no mapping for
//! are memoized as explicit empty results.

use cadmap_core::{
    convert_raw_mapping, model_instance_key, model_node_key, AssetMapping, CadNode, InstanceKey,
    InstanceReference, ModelInstanceIdKey, ModelNodeIdKey, ModelRevisionId, NodeId, TreeIndex,
};
use futures::future::FutureExt;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::backend::{MappingBackend, MappingFilter};
use crate::config::CacheConfig;
use crate::error::{MappingError, Result};
use crate::memo::MemoTable;
use crate::nodes::CadNodeCache;

/// Result of a nearest-mapped-ancestor lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAssetMappingResult {
    /// The nearest mapped ancestor, if any mapping was found on the chain.
    pub node: Option<CadNode>,
    /// All mappings attached to that node.
    pub mappings: Vec<AssetMapping>,
}

/// Classic mapping sub-cache. See the module docs.
pub struct ClassicMappingCache {
    backend: Arc<dyn MappingBackend>,
    config: CacheConfig,
    by_instance: Arc<MemoTable<ModelInstanceIdKey, Arc<Vec<AssetMapping>>>>,
    by_node: Arc<MemoTable<ModelNodeIdKey, Arc<Vec<AssetMapping>>>>,
    by_model: MemoTable<ModelRevisionId, Arc<Vec<AssetMapping>>>,
    nodes: CadNodeCache,
}

impl ClassicMappingCache {
    pub fn new(backend: Arc<dyn MappingBackend>, config: CacheConfig) -> Self {
        let nodes = CadNodeCache::new(Arc::clone(&backend), config.chunk_size);
        Self {
            backend,
            config,
            by_instance: Arc::new(MemoTable::new()),
            by_node: Arc::new(MemoTable::new()),
            by_model: MemoTable::new(),
            nodes,
        }
    }

    /// Nodes representing each of the given instances within one model
    /// revision, keyed by instance key.
    ///
    /// Only ids not already memoized are fetched, batched to the backend's
    /// per-request id cap, and each fetched mapping is written to both
    /// per-id tables.
    pub async fn get_nodes_for_instance_ids(
        &self,
        model: ModelRevisionId,
        instances: &[InstanceReference],
    ) -> Result<FxHashMap<InstanceKey, Vec<CadNode>>> {
        let wanted: FxHashSet<InstanceKey> = instances.iter().map(InstanceKey::from).collect();

        let mappings = self
            .mappings_for_instance_keys(model, wanted.iter().cloned().collect())
            .await?;

        // Defensive: keep only mappings for the requested keys, in case a
        // memoized entry carries a superset.
        let relevant: Vec<AssetMapping> = mappings
            .into_iter()
            .filter(|mapping| wanted.contains(&mapping.instance_key()))
            .collect();

        let node_ids: Vec<NodeId> = relevant.iter().map(|mapping| mapping.node_id).collect();
        let nodes = self.nodes.nodes_for_node_ids(model, &node_ids).await?;

        let mut result: FxHashMap<InstanceKey, Vec<CadNode>> = FxHashMap::default();
        for mapping in &relevant {
            if let Some(node) = nodes.get(&mapping.node_id) {
                result
                    .entry(mapping.instance_key())
                    .or_default()
                    .push(node.clone());
            }
        }
        Ok(result)
    }

    /// All mappings attached to any of the given nodes.
    pub async fn get_asset_mappings_for_nodes(
        &self,
        model: ModelRevisionId,
        nodes: &[CadNode],
    ) -> Result<Vec<AssetMapping>> {
        let node_ids: Vec<NodeId> = nodes.iter().map(|node| node.id).collect();
        self.mappings_for_node_ids(model, node_ids).await
    }

    /// Nearest mapped ancestor of an intersected node.
    ///
    /// `ancestors` must be the chain from the intersected node up to the
    /// root, leaf first; tree indexes therefore strictly decrease along the
    /// chain, which is checked rather than trusted. The whole chain's
    /// mappings are fetched in one batched call, and among the mapped
    /// ancestors the one with the largest tree index (closest to the leaf)
    /// wins; all of its mappings are returned together.
    pub async fn get_asset_mappings_for_lowest_ancestor(
        &self,
        model: ModelRevisionId,
        ancestors: &[CadNode],
    ) -> Result<NodeAssetMappingResult> {
        if ancestors.is_empty() {
            return Ok(NodeAssetMappingResult::default());
        }
        let leaf_first = ancestors
            .windows(2)
            .all(|pair| pair[0].tree_index > pair[1].tree_index);
        if !leaf_first {
            return Err(MappingError::AncestorOrder(
                "expected strictly decreasing tree indexes from leaf to root".into(),
            ));
        }

        let search_tree_indexes: FxHashSet<TreeIndex> =
            ancestors.iter().map(|node| node.tree_index).collect();
        let all_mappings = self.get_asset_mappings_for_nodes(model, ancestors).await?;

        let relevant: Vec<AssetMapping> = all_mappings
            .into_iter()
            .filter(|mapping| search_tree_indexes.contains(&mapping.tree_index))
            .collect();

        let Some(max_tree_index) = relevant.iter().map(|mapping| mapping.tree_index).max() else {
            return Ok(NodeAssetMappingResult::default());
        };

        let mappings = relevant
            .into_iter()
            .filter(|mapping| mapping.tree_index == max_tree_index)
            .collect();
        let node = ancestors
            .iter()
            .find(|node| node.tree_index == max_tree_index)
            .cloned();

        Ok(NodeAssetMappingResult { node, mappings })
    }

    /// The complete mapping listing for a model revision, fetched once per
    /// cache lifetime via cursor pagination and memoized whole.
    ///
    /// The finished listing also seeds both per-id tables, so follow-up
    /// per-id lookups cost nothing.
    pub async fn get_asset_mappings_for_model(
        &self,
        model: ModelRevisionId,
    ) -> Result<Arc<Vec<AssetMapping>>> {
        let backend = Arc::clone(&self.backend);
        let by_instance = Arc::clone(&self.by_instance);
        let by_node = Arc::clone(&self.by_node);
        let page_limit = self.config.page_limit;

        self.by_model
            .get_or_fetch(model, move || {
                async move {
                    tracing::info!(
                        model_id = model.model_id,
                        revision_id = model.revision_id,
                        "Fetching full asset mapping listing"
                    );
                    let mappings =
                        fetch_mapping_pages(&*backend, model, MappingFilter::All, page_limit)
                            .await?;

                    for (key, group) in group_by_instance_key(model, &mappings) {
                        by_instance.insert_value_if_absent(key, Arc::new(group));
                    }
                    for (key, group) in group_by_node_id(model, &mappings) {
                        by_node.insert_value_if_absent(key, Arc::new(group));
                    }

                    Ok(Arc::new(mappings))
                }
                .boxed()
            })
            .await
    }

    /// Seed the per-instance table from mappings the caller already holds,
    /// e.g. from a full-model listing fetched elsewhere.
    pub fn warm_instance_mappings(&self, model: ModelRevisionId, mappings: &[AssetMapping]) {
        let groups = group_by_instance_key(model, mappings);
        tracing::debug!(
            model_id = model.model_id,
            revision_id = model.revision_id,
            instances = groups.len(),
            "Warming per-instance mapping cache"
        );
        for (key, group) in groups {
            self.by_instance.insert_value_if_absent(key, Arc::new(group));
        }
    }

    /// Warm the node descriptor cache for the given node ids.
    pub async fn warm_nodes(&self, model: ModelRevisionId, node_ids: &[NodeId]) -> Result<()> {
        self.nodes.warm_nodes(model, node_ids).await
    }

    async fn mappings_for_instance_keys(
        &self,
        model: ModelRevisionId,
        keys: Vec<InstanceKey>,
    ) -> Result<Vec<AssetMapping>> {
        let full_keys: Vec<ModelInstanceIdKey> = keys
            .into_iter()
            .map(|key| model_instance_key(model, key))
            .collect();

        let backend = Arc::clone(&self.backend);
        let by_node = Arc::clone(&self.by_node);
        let chunk_size = self.config.chunk_size;
        let page_limit = self.config.page_limit;

        let resolved = self
            .by_instance
            .resolve_many(full_keys, Arc::new(Vec::new()), move |claimed| {
                async move {
                    // The classic filter endpoint only accepts numeric ids;
                    // namespaced keys fall through and memoize as empty.
                    let ids: Vec<u64> = claimed
                        .iter()
                        .filter_map(|key| match &key.1 {
                            InstanceKey::Classic(id) => Some(*id),
                            InstanceKey::Namespaced { .. } => None,
                        })
                        .collect();

                    let mut fetched: Vec<AssetMapping> = Vec::new();
                    for chunk in ids.chunks(chunk_size) {
                        tracing::debug!(
                            model_id = model.model_id,
                            revision_id = model.revision_id,
                            ids = chunk.len(),
                            "Fetching asset mappings by instance ids"
                        );
                        let mappings = fetch_mapping_pages(
                            &*backend,
                            model,
                            MappingFilter::InstanceIds(chunk.to_vec()),
                            page_limit,
                        )
                        .await?;
                        fetched.extend(mappings);
                    }

                    // Bidirectional memoization: feed the node-id table too.
                    for (key, group) in group_by_node_id(model, &fetched) {
                        by_node.insert_value_if_absent(key, Arc::new(group));
                    }

                    Ok(group_by_instance_key(model, &fetched)
                        .into_iter()
                        .map(|(key, group)| (key, Arc::new(group)))
                        .collect())
                }
                .boxed()
            })
            .await?;

        Ok(resolved
            .into_iter()
            .flat_map(|(_, group)| group.iter().cloned().collect::<Vec<_>>())
            .collect())
    }

    async fn mappings_for_node_ids(
        &self,
        model: ModelRevisionId,
        node_ids: Vec<NodeId>,
    ) -> Result<Vec<AssetMapping>> {
        let full_keys: Vec<ModelNodeIdKey> = node_ids
            .into_iter()
            .map(|id| model_node_key(model, id))
            .collect();

        let backend = Arc::clone(&self.backend);
        let by_instance = Arc::clone(&self.by_instance);
        let chunk_size = self.config.chunk_size;
        let page_limit = self.config.page_limit;

        let resolved = self
            .by_node
            .resolve_many(full_keys, Arc::new(Vec::new()), move |claimed| {
                async move {
                    let ids: Vec<NodeId> = claimed.iter().map(|key| key.1).collect();

                    let mut fetched: Vec<AssetMapping> = Vec::new();
                    for chunk in ids.chunks(chunk_size) {
                        tracing::debug!(
                            model_id = model.model_id,
                            revision_id = model.revision_id,
                            ids = chunk.len(),
                            "Fetching asset mappings by node ids"
                        );
                        let mappings = fetch_mapping_pages(
                            &*backend,
                            model,
                            MappingFilter::NodeIds(chunk.to_vec()),
                            page_limit,
                        )
                        .await?;
                        fetched.extend(mappings);
                    }

                    for (key, group) in group_by_instance_key(model, &fetched) {
                        by_instance.insert_value_if_absent(key, Arc::new(group));
                    }

                    Ok(group_by_node_id(model, &fetched)
                        .into_iter()
                        .map(|(key, group)| (key, Arc::new(group)))
                        .collect())
                }
                .boxed()
            })
            .await?;

        Ok(resolved
            .into_iter()
            .flat_map(|(_, group)| group.iter().cloned().collect::<Vec<_>>())
            .collect())
    }
}

/// Drain a cursor-paginated mapping listing into converted mappings.
async fn fetch_mapping_pages(
    backend: &dyn MappingBackend,
    model: ModelRevisionId,
    filter: MappingFilter,
    limit: u32,
) -> Result<Vec<AssetMapping>> {
    let mut mappings = Vec::new();
    let mut cursor = None;
    loop {
        let page = backend
            .filter_asset_mappings(model, &filter, limit, cursor)
            .await?;
        mappings.extend(page.items.iter().flat_map(convert_raw_mapping));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(mappings)
}

fn group_by_instance_key(
    model: ModelRevisionId,
    mappings: &[AssetMapping],
) -> FxHashMap<ModelInstanceIdKey, Vec<AssetMapping>> {
    let mut groups: FxHashMap<ModelInstanceIdKey, Vec<AssetMapping>> = FxHashMap::default();
    for mapping in mappings {
        groups
            .entry(model_instance_key(model, mapping.instance_key()))
            .or_default()
            .push(mapping.clone());
    }
    groups
}

fn group_by_node_id(
    model: ModelRevisionId,
    mappings: &[AssetMapping],
) -> FxHashMap<ModelNodeIdKey, Vec<AssetMapping>> {
    let mut groups: FxHashMap<ModelNodeIdKey, Vec<AssetMapping>> = FxHashMap::default();
    for mapping in mappings {
        groups
            .entry(model_node_key(model, mapping.node_id))
            .or_default()
            .push(mapping.clone());
    }
    groups
}
