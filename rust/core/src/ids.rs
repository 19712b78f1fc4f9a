// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifiers for model revisions, scene-graph nodes and business instances.

use serde::{Deserialize, Serialize};

/// Opaque id of one CAD node within one model revision's scene graph.
pub type NodeId = u64;

/// Position of a node in a pre-order traversal of the scene graph.
///
/// A node's subtree occupies the contiguous range
/// `[tree_index, tree_index + subtree_size)`.
pub type TreeIndex = u64;

/// Number of nodes in the subtree rooted at a node, including itself.
pub type SubtreeSize = u64;

/// Numeric id of a business instance in the classic addressing scheme.
pub type ClassicInstanceId = u64;

/// Identifies one loaded revision of a 3D model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRevisionId {
    pub model_id: u64,
    pub revision_id: u64,
}

impl ModelRevisionId {
    pub fn new(model_id: u64, revision_id: u64) -> Self {
        Self {
            model_id,
            revision_id,
        }
    }
}

/// Axis-aligned bounding box of a node, in model coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Scene-graph node descriptor, owned by the remote backend.
///
/// The caches only ever hold read-only copies of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadNode {
    pub id: NodeId,
    pub tree_index: TreeIndex,
    pub subtree_size: SubtreeSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    pub depth: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Namespaced `(space, externalId)` identifier from the graph data model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedInstanceId {
    pub space: String,
    pub external_id: String,
}

impl NamespacedInstanceId {
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
        }
    }
}

/// Reference to a business instance in either addressing scheme.
///
/// Raw backend records are parsed into this tagged form at the wire boundary
/// so downstream code matches exhaustively instead of probing field presence.
/// On the wire a classic reference is a bare number and a namespaced one an
/// object, hence the untagged representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceReference {
    Classic(ClassicInstanceId),
    Namespaced(NamespacedInstanceId),
}

impl InstanceReference {
    pub fn as_classic(&self) -> Option<ClassicInstanceId> {
        match self {
            Self::Classic(id) => Some(*id),
            Self::Namespaced(_) => None,
        }
    }

    pub fn as_namespaced(&self) -> Option<&NamespacedInstanceId> {
        match self {
            Self::Classic(_) => None,
            Self::Namespaced(id) => Some(id),
        }
    }
}

impl From<ClassicInstanceId> for InstanceReference {
    fn from(id: ClassicInstanceId) -> Self {
        Self::Classic(id)
    }
}

impl From<NamespacedInstanceId> for InstanceReference {
    fn from(id: NamespacedInstanceId) -> Self {
        Self::Namespaced(id)
    }
}
