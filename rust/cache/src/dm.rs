// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Namespaced (DM) mapping sub-cache.
//!
//! Namespaced instances are not scoped to one model, so the DM listing
//! endpoint accepts many model revisions per call. The cache exploits that by
//! fetching the complete connection listing of each not-yet-seen revision
//! once and answering per-instance queries by intersection, instead of
//! re-querying per instance set.

use cadmap_core::{
    model_tree_index_key, CadNode, DmConnection, DmConnectionWithNode, InstanceKey,
    ModelRevisionId, ModelTreeIndexKey, NamespacedInstanceId, TreeIndex, ViewRef,
};
use futures::future::FutureExt;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::backend::MappingBackend;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::memo::{MemoTable, SharedSlot};

/// Per-instance view lookup table for one model revision.
pub type InstanceViewMap = FxHashMap<NamespacedInstanceId, Vec<ViewRef>>;

/// The complete DM connection listing of one model revision, with optional
/// per-instance views.
#[derive(Debug, Clone)]
pub struct DmModelConnections {
    pub model: ModelRevisionId,
    pub connections: Arc<Vec<DmConnectionWithNode>>,
    /// Present only when views were requested.
    pub views: Option<Arc<InstanceViewMap>>,
}

/// The nearest ancestor of an intersected node that carries DM connections.
#[derive(Debug, Clone, PartialEq)]
pub struct DmAncestorMatch {
    pub node: CadNode,
    pub instances: Vec<NamespacedInstanceId>,
}

/// Deferred halves of a closest-parent lookup.
///
/// The ancestor match is cheap (one ancestor listing plus the memoized
/// revision connections); the views half additionally hits the instance
/// inspection endpoint and is often not needed, so its fetch only runs once
/// [`Self::views`] is first awaited.
pub struct ClosestParentLookup {
    key: ModelTreeIndexKey,
    match_table: Arc<MemoTable<ModelTreeIndexKey, Option<DmAncestorMatch>>>,
    views_table: Arc<MemoTable<ModelTreeIndexKey, Arc<Vec<ViewRef>>>>,
    match_slot: SharedSlot<Option<DmAncestorMatch>>,
    views_slot: SharedSlot<Arc<Vec<ViewRef>>>,
}

impl ClosestParentLookup {
    /// The nearest ancestor carrying DM connections, if any.
    pub async fn ancestor_match(&self) -> Result<Option<DmAncestorMatch>> {
        self.match_table
            .await_slot(&self.key, self.match_slot.clone())
            .await
    }

    /// Views satisfied by the matched ancestor's instances.
    pub async fn views(&self) -> Result<Arc<Vec<ViewRef>>> {
        self.views_table
            .await_slot(&self.key, self.views_slot.clone())
            .await
    }
}

/// DM mapping sub-cache. See the module docs.
pub struct DmMappingCache {
    backend: Arc<dyn MappingBackend>,
    config: CacheConfig,
    connections: Arc<MemoTable<ModelRevisionId, Arc<Vec<DmConnectionWithNode>>>>,
    views: Arc<MemoTable<ModelRevisionId, Arc<InstanceViewMap>>>,
    parent_matches: Arc<MemoTable<ModelTreeIndexKey, Option<DmAncestorMatch>>>,
    parent_views: Arc<MemoTable<ModelTreeIndexKey, Arc<Vec<ViewRef>>>>,
}

impl DmMappingCache {
    pub fn new(backend: Arc<dyn MappingBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            connections: Arc::new(MemoTable::new()),
            views: Arc::new(MemoTable::new()),
            parent_matches: Arc::new(MemoTable::new()),
            parent_views: Arc::new(MemoTable::new()),
        }
    }

    /// Which of the given instances are mapped into which of the given model
    /// revisions, as per-model `InstanceKey -> nodes` tables.
    pub async fn get_mappings_for_instances(
        &self,
        instances: &[NamespacedInstanceId],
        models: &[ModelRevisionId],
    ) -> Result<FxHashMap<ModelRevisionId, FxHashMap<InstanceKey, Vec<CadNode>>>> {
        let wanted: FxHashSet<&NamespacedInstanceId> = instances.iter().collect();
        let per_model = connections_for_models(
            Arc::clone(&self.backend),
            Arc::clone(&self.connections),
            self.config.clone(),
            models.to_vec(),
        )
        .await?;

        let mut result: FxHashMap<ModelRevisionId, FxHashMap<InstanceKey, Vec<CadNode>>> =
            FxHashMap::default();
        for (model, connections) in per_model {
            let entry = result.entry(model).or_default();
            for item in connections.iter() {
                if !wanted.contains(&item.connection.instance) {
                    continue;
                }
                entry
                    .entry(namespaced_key(&item.connection.instance))
                    .or_default()
                    .push(item.node.clone());
            }
        }
        Ok(result)
    }

    /// The complete connection listings of the given model revisions,
    /// optionally with the views each mapped instance satisfies.
    pub async fn get_all_connections(
        &self,
        models: &[ModelRevisionId],
        fetch_views: bool,
    ) -> Result<Vec<DmModelConnections>> {
        let mut per_model = connections_for_models(
            Arc::clone(&self.backend),
            Arc::clone(&self.connections),
            self.config.clone(),
            models.to_vec(),
        )
        .await?;

        let mut result = Vec::with_capacity(models.len());
        for &model in models {
            let Some(connections) = per_model.remove(&model) else {
                continue;
            };
            let views = if fetch_views {
                Some(self.views_for_model(model, &connections).await?)
            } else {
                None
            };
            result.push(DmModelConnections {
                model,
                connections,
                views,
            });
        }
        Ok(result)
    }

    /// Closest-parent lookup for the node at `tree_index`, split into a cheap
    /// ancestor-match half and a lazy views half. Both halves are memoized
    /// per `(model, tree_index)`.
    pub fn closest_parent_data(
        &self,
        model: ModelRevisionId,
        tree_index: TreeIndex,
    ) -> ClosestParentLookup {
        let key = model_tree_index_key(model, tree_index);

        let match_slot = {
            let backend = Arc::clone(&self.backend);
            let connections = Arc::clone(&self.connections);
            let config = self.config.clone();
            self.parent_matches.slot_or_insert_with(key.clone(), move || {
                async move {
                    let ancestors = backend.ancestor_nodes(model, tree_index).await?;
                    let per_model =
                        connections_for_models(backend, connections, config, vec![model]).await?;
                    let revision = per_model
                        .get(&model)
                        .cloned()
                        .unwrap_or_else(|| Arc::new(Vec::new()));

                    let best = ancestors
                        .iter()
                        .filter_map(|node| {
                            let instances: Vec<NamespacedInstanceId> = revision
                                .iter()
                                .filter(|item| item.connection.tree_index == node.tree_index)
                                .map(|item| item.connection.instance.clone())
                                .collect();
                            (!instances.is_empty()).then(|| (node.clone(), instances))
                        })
                        .max_by_key(|(node, _)| node.tree_index)
                        .map(|(node, instances)| DmAncestorMatch { node, instances });
                    Ok(best)
                }
                .boxed()
            })
        };

        let views_slot = {
            let backend = Arc::clone(&self.backend);
            let match_table = Arc::clone(&self.parent_matches);
            let match_slot = match_slot.clone();
            let chunk_size = self.config.chunk_size;
            self.parent_views.slot_or_insert_with(key.clone(), move || {
                async move {
                    // Await through the table so a failed match fetch is
                    // evicted even when only the views half is driven
                    let Some(found) = match_table.await_slot(&key, match_slot).await? else {
                        return Ok(Arc::new(Vec::new()));
                    };
                    let mut views = Vec::new();
                    for chunk in found.instances.chunks(chunk_size) {
                        let inspected = backend.inspect_instances(chunk).await?;
                        for item in inspected {
                            views.extend(item.views);
                        }
                    }
                    Ok(Arc::new(views))
                }
                .boxed()
            })
        };

        ClosestParentLookup {
            key,
            match_table: Arc::clone(&self.parent_matches),
            views_table: Arc::clone(&self.parent_views),
            match_slot,
            views_slot,
        }
    }

    /// Views satisfied by one revision's mapped instances, fetched once per
    /// revision through the inspection endpoint.
    async fn views_for_model(
        &self,
        model: ModelRevisionId,
        connections: &Arc<Vec<DmConnectionWithNode>>,
    ) -> Result<Arc<InstanceViewMap>> {
        let backend = Arc::clone(&self.backend);
        let chunk_size = self.config.chunk_size;
        let connections = Arc::clone(connections);

        self.views
            .get_or_fetch(model, move || {
                async move {
                    let mut distinct: Vec<NamespacedInstanceId> = Vec::new();
                    let mut seen: FxHashSet<&NamespacedInstanceId> = FxHashSet::default();
                    for item in connections.iter() {
                        if seen.insert(&item.connection.instance) {
                            distinct.push(item.connection.instance.clone());
                        }
                    }
                    tracing::debug!(
                        model_id = model.model_id,
                        revision_id = model.revision_id,
                        instances = distinct.len(),
                        "Inspecting DM instances for views"
                    );

                    let mut map: InstanceViewMap = FxHashMap::default();
                    for chunk in distinct.chunks(chunk_size) {
                        let inspected = backend.inspect_instances(chunk).await?;
                        for item in inspected {
                            map.insert(item.instance, item.views);
                        }
                    }
                    Ok(Arc::new(map))
                }
                .boxed()
            })
            .await
    }
}

/// Resolve the complete connection listing of each model revision, fetching
/// not-yet-seen revisions in model batches and pairing every connection with
/// its scene-graph node.
async fn connections_for_models(
    backend: Arc<dyn MappingBackend>,
    table: Arc<MemoTable<ModelRevisionId, Arc<Vec<DmConnectionWithNode>>>>,
    config: CacheConfig,
    models: Vec<ModelRevisionId>,
) -> Result<FxHashMap<ModelRevisionId, Arc<Vec<DmConnectionWithNode>>>> {
    let resolved = table
        .resolve_many(models, Arc::new(Vec::new()), move |claimed| {
            async move {
                let mut grouped: FxHashMap<ModelRevisionId, Vec<DmConnection>> =
                    claimed.iter().map(|&model| (model, Vec::new())).collect();

                for chunk in claimed.chunks(config.dm_model_batch_size) {
                    tracing::debug!(models = chunk.len(), "Fetching DM connection listings");
                    let connections =
                        fetch_connection_pages(&*backend, chunk, config.page_limit).await?;
                    for connection in connections {
                        grouped
                            .entry(connection.model_revision())
                            .or_default()
                            .push(connection);
                    }
                }

                let mut result = FxHashMap::default();
                for (model, connections) in grouped {
                    let with_nodes =
                        resolve_connection_nodes(&*backend, model, connections, config.chunk_size)
                            .await?;
                    result.insert(model, Arc::new(with_nodes));
                }
                Ok(result)
            }
            .boxed()
        })
        .await?;

    Ok(resolved.into_iter().collect())
}

/// Drain the cursor-paginated DM listing for a batch of model revisions.
async fn fetch_connection_pages(
    backend: &dyn MappingBackend,
    models: &[ModelRevisionId],
    limit: u32,
) -> Result<Vec<DmConnection>> {
    let mut connections = Vec::new();
    let mut cursor = None;
    loop {
        let page = backend
            .filter_dm_connections(models, None, limit, cursor)
            .await?;
        connections.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(connections)
}

/// Pair connections with their node descriptors, looked up by tree index.
/// Connections whose tree index the scene graph does not know are dropped.
async fn resolve_connection_nodes(
    backend: &dyn MappingBackend,
    model: ModelRevisionId,
    connections: Vec<DmConnection>,
    chunk_size: usize,
) -> Result<Vec<DmConnectionWithNode>> {
    let mut tree_indexes: Vec<TreeIndex> = Vec::new();
    let mut seen: FxHashSet<TreeIndex> = FxHashSet::default();
    for connection in &connections {
        if seen.insert(connection.tree_index) {
            tree_indexes.push(connection.tree_index);
        }
    }

    let mut nodes: FxHashMap<TreeIndex, CadNode> = FxHashMap::default();
    for chunk in tree_indexes.chunks(chunk_size) {
        let fetched = backend.nodes_by_tree_indexes(model, chunk).await?;
        for node in fetched {
            nodes.insert(node.tree_index, node);
        }
    }

    Ok(connections
        .into_iter()
        .filter_map(|connection| {
            nodes.get(&connection.tree_index).map(|node| DmConnectionWithNode {
                node: node.clone(),
                connection,
            })
        })
        .collect())
}

fn namespaced_key(instance: &NamespacedInstanceId) -> InstanceKey {
    InstanceKey::Namespaced {
        space: instance.space.clone(),
        external_id: instance.external_id.clone(),
    }
}
