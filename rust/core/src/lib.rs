// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # CadMap Core
//!
//! Identity, key translation and the mapping data model shared by the CadMap
//! caches. This crate is pure data: no I/O, no async.
//!
//! ## Overview
//!
//! A 3D viewer needs to map scene-graph nodes of loaded CAD model revisions
//! to the business instances they represent, and back. Instances are
//! identified either by a classic numeric id or by a namespaced
//! `(space, externalId)` pair from a graph-style data model. This crate
//! provides:
//!
//! - **Identifiers**: [`ModelRevisionId`], [`CadNode`], [`InstanceReference`]
//! - **Key translation**: hashable, totally-ordered [`InstanceKey`]s and the
//!   composite map keys ([`ModelNodeIdKey`], [`ModelInstanceIdKey`], ...)
//! - **Mappings**: [`AssetMapping`] edges and the conversion from raw backend
//!   records, including hybrid fan-out and dropping of legacy records that
//!   lack tree data
//!
//! ## Quick Start
//!
//! ```rust
//! use cadmap_core::{instance_key, InstanceKey, InstanceReference, NamespacedInstanceId};
//!
//! let classic = InstanceReference::Classic(42);
//! assert_eq!(instance_key(&classic), InstanceKey::Classic(42));
//!
//! let namespaced = InstanceReference::Namespaced(NamespacedInstanceId {
//!     space: "plant".into(),
//!     external_id: "pump-01".into(),
//! });
//! assert_eq!(instance_key(&namespaced).to_string(), "plant/pump-01");
//! ```

pub mod ids;
pub mod keys;
pub mod mapping;

pub use ids::{
    BoundingBox, CadNode, ClassicInstanceId, InstanceReference, ModelRevisionId,
    NamespacedInstanceId, NodeId, SubtreeSize, TreeIndex,
};
pub use keys::{
    instance_key, model_instance_key, model_node_key, model_tree_index_key, InstanceKey,
    KeyParseError, ModelInstanceIdKey, ModelNodeIdKey, ModelTreeIndexKey,
};
pub use mapping::{
    convert_raw_mapping, AssetMapping, DmConnection, DmConnectionWithNode, RawAssetMapping,
    TreeIndexMapping, ViewRef,
};
