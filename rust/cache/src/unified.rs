// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unified instance mapping cache.
//!
//! Composes the classic and DM sub-caches: a mixed instance list is
//! partitioned by addressing scheme, the DM side is queried once across all
//! models, the classic side once per model with bounded parallelism, and the
//! per-model results are merged into one table. On a key collision (a hybrid
//! mapping visible from both backends) node lists are concatenated, never
//! overwritten.

use cadmap_core::{
    CadNode, InstanceKey, InstanceReference, ModelRevisionId, NamespacedInstanceId, TreeIndex,
    TreeIndexMapping,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::backend::MappingBackend;
use crate::classic::{ClassicMappingCache, NodeAssetMappingResult};
use crate::config::CacheConfig;
use crate::dm::{ClosestParentLookup, DmMappingCache};
use crate::error::{MappingError, Result};

/// Nodes matched per instance within one model revision.
pub type InstanceNodeMap = FxHashMap<InstanceKey, Vec<CadNode>>;
/// Per-model instance-to-node tables.
pub type ModelInstanceNodeMap = FxHashMap<ModelRevisionId, InstanceNodeMap>;
/// Tree ranges matched per instance within one model revision.
pub type InstanceTreeIndexMap = FxHashMap<InstanceKey, Vec<TreeIndexMapping>>;
/// Per-model instance-to-tree-range tables.
pub type ModelInstanceTreeIndexMap = FxHashMap<ModelRevisionId, InstanceTreeIndexMap>;

/// Facade over the two mapping sub-caches. One instance per viewing session;
/// share it via `Arc`.
pub struct UnifiedMappingCache {
    classic: ClassicMappingCache,
    dm: DmMappingCache,
    config: CacheConfig,
}

impl UnifiedMappingCache {
    pub fn new(backend: Arc<dyn MappingBackend>, config: CacheConfig) -> Self {
        Self {
            classic: ClassicMappingCache::new(Arc::clone(&backend), config.clone()),
            dm: DmMappingCache::new(backend, config.clone()),
            config,
        }
    }

    pub fn classic(&self) -> &ClassicMappingCache {
        &self.classic
    }

    pub fn dm(&self) -> &DmMappingCache {
        &self.dm
    }

    /// Nodes representing the given instances across the given model
    /// revisions.
    ///
    /// An empty instance or model list short-circuits to an empty result
    /// without touching the backend.
    pub async fn get_mappings_for_models_and_instances(
        &self,
        instances: &[InstanceReference],
        models: &[ModelRevisionId],
    ) -> Result<ModelInstanceNodeMap> {
        if instances.is_empty() || models.is_empty() {
            return Ok(FxHashMap::default());
        }

        let mut classic_refs: Vec<InstanceReference> = Vec::new();
        let mut namespaced: Vec<NamespacedInstanceId> = Vec::new();
        for instance in instances {
            match instance {
                InstanceReference::Classic(_) => classic_refs.push(instance.clone()),
                InstanceReference::Namespaced(id) => namespaced.push(id.clone()),
            }
        }

        // The DM endpoint spans models, so one logical call covers them all.
        let mut merged: ModelInstanceNodeMap = if namespaced.is_empty() {
            FxHashMap::default()
        } else {
            self.dm.get_mappings_for_instances(&namespaced, models).await?
        };

        if !classic_refs.is_empty() {
            let per_model: Vec<(ModelRevisionId, InstanceNodeMap)> =
                stream::iter(models.iter().map(|&model| {
                    let classic = &self.classic;
                    let refs = &classic_refs;
                    async move {
                        let nodes = classic.get_nodes_for_instance_ids(model, refs).await?;
                        Ok::<_, MappingError>((model, nodes))
                    }
                }))
                .buffered(self.config.max_concurrent_requests)
                .try_collect()
                .await?;

            for (model, table) in per_model {
                merge_into(merged.entry(model).or_default(), table);
            }
        }

        Ok(merged)
    }

    /// The complete mapping table of every given model revision, in the
    /// lightweight tree-range form used for bulk styling.
    ///
    /// Classic listings and the DM listing have no data dependency and run
    /// concurrently.
    pub async fn get_all_model_mappings(
        &self,
        models: &[ModelRevisionId],
    ) -> Result<ModelInstanceTreeIndexMap> {
        if models.is_empty() {
            return Ok(FxHashMap::default());
        }

        let classic_side = async {
            stream::iter(models.iter().map(|&model| async move {
                let mappings = self.classic.get_asset_mappings_for_model(model).await?;
                let mut table: InstanceTreeIndexMap = FxHashMap::default();
                for mapping in mappings.iter() {
                    table
                        .entry(mapping.instance_key())
                        .or_default()
                        .push(TreeIndexMapping::from(mapping));
                }
                Ok::<_, MappingError>((model, table))
            }))
            .buffered(self.config.max_concurrent_requests)
            .try_collect::<Vec<_>>()
            .await
        };
        let dm_side = self.dm.get_all_connections(models, false);

        let (classic_tables, dm_listings) = tokio::join!(classic_side, dm_side);

        let mut merged: ModelInstanceTreeIndexMap = FxHashMap::default();
        for (model, table) in classic_tables? {
            merge_into(merged.entry(model).or_default(), table);
        }
        for listing in dm_listings? {
            let entry = merged.entry(listing.model).or_default();
            for item in listing.connections.iter() {
                let key = InstanceKey::Namespaced {
                    space: item.connection.instance.space.clone(),
                    external_id: item.connection.instance.external_id.clone(),
                };
                entry.entry(key).or_default().push(TreeIndexMapping {
                    tree_index: item.node.tree_index,
                    subtree_size: item.node.subtree_size,
                });
            }
        }
        Ok(merged)
    }

    /// Nearest mapped ancestor of an intersected node, through the classic
    /// sub-cache.
    pub async fn get_asset_mappings_for_lowest_ancestor(
        &self,
        model: ModelRevisionId,
        ancestors: &[CadNode],
    ) -> Result<NodeAssetMappingResult> {
        self.classic
            .get_asset_mappings_for_lowest_ancestor(model, ancestors)
            .await
    }

    /// Deferred DM closest-parent lookup for an intersected node.
    pub fn closest_parent_data(
        &self,
        model: ModelRevisionId,
        tree_index: TreeIndex,
    ) -> ClosestParentLookup {
        self.dm.closest_parent_data(model, tree_index)
    }
}

/// Union `source` into `target`, concatenating value lists on key collision.
fn merge_into<K, T>(target: &mut FxHashMap<K, Vec<T>>, source: FxHashMap<K, Vec<T>>)
where
    K: Eq + Hash,
{
    for (key, values) in source {
        target.entry(key).or_default().extend(values);
    }
}
