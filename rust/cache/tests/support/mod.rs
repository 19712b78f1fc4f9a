#![allow(dead_code)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory mapping backend with request accounting for cache tests.

use async_trait::async_trait;
use cadmap_cache::{
    InstanceInspection, MappingBackend, MappingError, MappingFilter, Page, Result,
};
use cadmap_core::{
    CadNode, DmConnection, ModelRevisionId, NamespacedInstanceId, NodeId, RawAssetMapping,
    TreeIndex, ViewRef,
};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Request accounting shared with the test body.
#[derive(Default)]
pub struct CallLog {
    /// Id count of every successful classic filter request (0 for the
    /// unfiltered full listing), one entry per page request.
    pub filter_id_counts: Mutex<Vec<usize>>,
    pub node_calls: AtomicUsize,
    pub tree_index_calls: AtomicUsize,
    pub ancestor_calls: AtomicUsize,
    pub dm_calls: AtomicUsize,
    pub inspect_calls: AtomicUsize,
    /// Peak number of concurrently in-flight classic filter requests.
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    /// When set, classic filter requests fail.
    pub fail_filter: AtomicBool,
    /// When set, DM listing requests fail.
    pub fail_dm: AtomicBool,
}

impl CallLog {
    pub fn filter_calls(&self) -> usize {
        self.filter_id_counts.lock().unwrap().len()
    }
}

/// In-memory [`MappingBackend`] seeded through its public fields.
#[derive(Default)]
pub struct FakeBackend {
    pub mappings: FxHashMap<ModelRevisionId, Vec<RawAssetMapping>>,
    pub nodes: FxHashMap<ModelRevisionId, Vec<CadNode>>,
    pub ancestors: FxHashMap<(ModelRevisionId, TreeIndex), Vec<CadNode>>,
    pub connections: Vec<DmConnection>,
    pub inspections: FxHashMap<NamespacedInstanceId, Vec<ViewRef>>,
    pub log: CallLog,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: &[T], limit: u32, cursor: Option<String>) -> Page<T> {
    let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let end = (offset + limit as usize).min(items.len());
    let next_cursor = (end < items.len()).then(|| end.to_string());
    Page {
        items: items[offset..end].to_vec(),
        next_cursor,
    }
}

#[async_trait]
impl MappingBackend for FakeBackend {
    async fn filter_asset_mappings(
        &self,
        model: ModelRevisionId,
        filter: &MappingFilter,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<RawAssetMapping>> {
        let current = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // Keep the request in flight long enough for overlap to be observable
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.log.fail_filter.load(Ordering::SeqCst) {
            return Err(MappingError::Request("injected failure".into()));
        }

        let id_count = match filter {
            MappingFilter::All => 0,
            MappingFilter::InstanceIds(ids) => ids.len(),
            MappingFilter::NodeIds(ids) => ids.len(),
        };
        self.log.filter_id_counts.lock().unwrap().push(id_count);

        let matched: Vec<RawAssetMapping> = self
            .mappings
            .get(&model)
            .map(|records| {
                records
                    .iter()
                    .filter(|raw| match filter {
                        MappingFilter::All => true,
                        MappingFilter::InstanceIds(ids) => {
                            raw.asset_id.is_some_and(|id| ids.contains(&id))
                        }
                        MappingFilter::NodeIds(ids) => ids.contains(&raw.node_id),
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(&matched, limit, cursor))
    }

    async fn nodes_by_ids(
        &self,
        model: ModelRevisionId,
        node_ids: &[NodeId],
    ) -> Result<Vec<CadNode>> {
        self.log.node_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .nodes
            .get(&model)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|node| node_ids.contains(&node.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn nodes_by_tree_indexes(
        &self,
        model: ModelRevisionId,
        tree_indexes: &[TreeIndex],
    ) -> Result<Vec<CadNode>> {
        self.log.tree_index_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .nodes
            .get(&model)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|node| tree_indexes.contains(&node.tree_index))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ancestor_nodes(
        &self,
        model: ModelRevisionId,
        tree_index: TreeIndex,
    ) -> Result<Vec<CadNode>> {
        self.log.ancestor_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .ancestors
            .get(&(model, tree_index))
            .cloned()
            .unwrap_or_default())
    }

    async fn filter_dm_connections(
        &self,
        models: &[ModelRevisionId],
        instances: Option<&[NamespacedInstanceId]>,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<DmConnection>> {
        self.log.dm_calls.fetch_add(1, Ordering::SeqCst);
        if self.log.fail_dm.load(Ordering::SeqCst) {
            return Err(MappingError::Request("injected failure".into()));
        }
        let matched: Vec<DmConnection> = self
            .connections
            .iter()
            .filter(|connection| models.contains(&connection.model_revision()))
            .filter(|connection| {
                instances.map_or(true, |wanted| wanted.contains(&connection.instance))
            })
            .cloned()
            .collect();
        Ok(paginate(&matched, limit, cursor))
    }

    async fn inspect_instances(
        &self,
        instances: &[NamespacedInstanceId],
    ) -> Result<Vec<InstanceInspection>> {
        self.log.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(instances
            .iter()
            .filter_map(|instance| {
                self.inspections.get(instance).map(|views| InstanceInspection {
                    instance: instance.clone(),
                    views: views.clone(),
                })
            })
            .collect())
    }
}

/// A node descriptor with just enough shape for cache tests.
pub fn cad_node(id: NodeId, tree_index: TreeIndex, subtree_size: u64) -> CadNode {
    CadNode {
        id,
        tree_index,
        subtree_size,
        parent_id: None,
        depth: 0,
        name: format!("node-{id}"),
        bounding_box: None,
    }
}

/// A classic-only raw mapping record with tree data present.
pub fn classic_record(node_id: NodeId, tree_index: TreeIndex, asset_id: u64) -> RawAssetMapping {
    RawAssetMapping {
        node_id,
        tree_index: Some(tree_index),
        subtree_size: Some(1),
        asset_id: Some(asset_id),
        instance: None,
    }
}

pub fn dm_connection(
    model: ModelRevisionId,
    space: &str,
    external_id: &str,
    tree_index: TreeIndex,
) -> DmConnection {
    DmConnection {
        instance: NamespacedInstanceId::new(space, external_id),
        model_id: model.model_id,
        revision_id: model.revision_id,
        tree_index,
    }
}
