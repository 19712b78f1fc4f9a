// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Asset mappings and conversion from raw backend records.

use crate::ids::{
    InstanceReference, ModelRevisionId, NamespacedInstanceId, NodeId, SubtreeSize, TreeIndex,
};
use crate::keys::{instance_key, InstanceKey};
use serde::{Deserialize, Serialize};

/// One edge between a CAD node and a business instance.
///
/// A node may carry zero, one or many mappings; an instance may map to many
/// nodes (repeated geometry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMapping {
    pub node_id: NodeId,
    pub tree_index: TreeIndex,
    pub subtree_size: SubtreeSize,
    pub instance: InstanceReference,
}

impl AssetMapping {
    pub fn instance_key(&self) -> InstanceKey {
        instance_key(&self.instance)
    }
}

/// Lightweight tree-range form of a mapping, used by full-model styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeIndexMapping {
    pub tree_index: TreeIndex,
    pub subtree_size: SubtreeSize,
}

impl From<&AssetMapping> for TreeIndexMapping {
    fn from(mapping: &AssetMapping) -> Self {
        Self {
            tree_index: mapping.tree_index,
            subtree_size: mapping.subtree_size,
        }
    }
}

/// Raw mapping record as returned by the classic listing endpoint.
///
/// Older records may lack `treeIndex`/`subtreeSize`. A hybrid record carries
/// both a classic and a namespaced id for the same node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAssetMapping {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_index: Option<TreeIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtree_size: Option<SubtreeSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<NamespacedInstanceId>,
}

/// Convert a raw record into usable mappings.
///
/// Records missing `treeIndex` or `subtreeSize` are dropped: a mapping is
/// only usable once its tree range is known. A hybrid record fans out into
/// two mappings, one per addressing scheme, since the two schemes are
/// independently consumed by callers.
pub fn convert_raw_mapping(raw: &RawAssetMapping) -> Vec<AssetMapping> {
    let (Some(tree_index), Some(subtree_size)) = (raw.tree_index, raw.subtree_size) else {
        return Vec::new();
    };

    let mut mappings = Vec::with_capacity(2);
    if let Some(asset_id) = raw.asset_id {
        mappings.push(AssetMapping {
            node_id: raw.node_id,
            tree_index,
            subtree_size,
            instance: InstanceReference::Classic(asset_id),
        });
    }
    if let Some(instance) = &raw.instance {
        mappings.push(AssetMapping {
            node_id: raw.node_id,
            tree_index,
            subtree_size,
            instance: InstanceReference::Namespaced(instance.clone()),
        });
    }
    mappings
}

/// One namespaced instance mapped into one model revision, as returned by
/// the DM listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmConnection {
    pub instance: NamespacedInstanceId,
    pub model_id: u64,
    pub revision_id: u64,
    pub tree_index: TreeIndex,
}

impl DmConnection {
    pub fn model_revision(&self) -> ModelRevisionId {
        ModelRevisionId::new(self.model_id, self.revision_id)
    }
}

/// A DM connection together with its resolved scene-graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct DmConnectionWithNode {
    pub connection: DmConnection,
    pub node: crate::ids::CadNode,
}

/// Reference to a DM view (source) an instance satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRef {
    pub space: String,
    pub external_id: String,
    pub version: String,
}
