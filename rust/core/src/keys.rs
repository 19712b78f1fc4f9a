// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key translation between composite identities and hashable map keys.
//!
//! All functions here are pure and total. The memo tables of the caching
//! layer are keyed with these types, so they must be cheap to hash and
//! injective: two distinct identities must never produce the same key.

use crate::ids::{
    ClassicInstanceId, InstanceReference, ModelRevisionId, NodeId, TreeIndex,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Totally-ordered, hashable projection of an [`InstanceReference`].
///
/// Classic ids stay numerically comparable among themselves. Namespaced ids
/// keep their two components instead of being concatenated into a single
/// string, which makes the projection injective without any separator
/// escaping ("a/b" + "c" and "a" + "b/c" remain distinct keys).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceKey {
    Classic(ClassicInstanceId),
    Namespaced { space: String, external_id: String },
}

impl fmt::Display for InstanceKey {
    /// Renders the conventional `space/externalId` form for namespaced keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic(id) => write!(f, "{id}"),
            Self::Namespaced { space, external_id } => write!(f, "{space}/{external_id}"),
        }
    }
}

impl From<&InstanceReference> for InstanceKey {
    fn from(reference: &InstanceReference) -> Self {
        match reference {
            InstanceReference::Classic(id) => Self::Classic(*id),
            InstanceReference::Namespaced(id) => Self::Namespaced {
                space: id.space.clone(),
                external_id: id.external_id.clone(),
            },
        }
    }
}

/// Key for an [`InstanceReference`].
pub fn instance_key(reference: &InstanceReference) -> InstanceKey {
    InstanceKey::from(reference)
}

/// Key addressing one node within one model revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelNodeIdKey(pub ModelRevisionId, pub NodeId);

/// Key addressing one instance within one model revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelInstanceIdKey(pub ModelRevisionId, pub InstanceKey);

/// Key addressing one tree index within one model revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelTreeIndexKey(pub ModelRevisionId, pub TreeIndex);

/// Key for a node within a model revision.
pub fn model_node_key(model: ModelRevisionId, node_id: NodeId) -> ModelNodeIdKey {
    ModelNodeIdKey(model, node_id)
}

/// Key for an instance within a model revision.
pub fn model_instance_key(model: ModelRevisionId, key: InstanceKey) -> ModelInstanceIdKey {
    ModelInstanceIdKey(model, key)
}

/// Key for a tree index within a model revision.
pub fn model_tree_index_key(model: ModelRevisionId, tree_index: TreeIndex) -> ModelTreeIndexKey {
    ModelTreeIndexKey(model, tree_index)
}

/// Error parsing a `"modelId/revisionId"` key back into its parts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("expected '<modelId>/<revisionId>', got '{0}'")]
    Malformed(String),
}

impl fmt::Display for ModelRevisionId {
    /// The `"modelId/revisionId"` string form used in logs and URLs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_id, self.revision_id)
    }
}

impl FromStr for ModelRevisionId {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (model, revision) = s
            .split_once('/')
            .ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;
        let model_id = model
            .parse()
            .map_err(|_| KeyParseError::Malformed(s.to_string()))?;
        let revision_id = revision
            .parse()
            .map_err(|_| KeyParseError::Malformed(s.to_string()))?;
        Ok(Self {
            model_id,
            revision_id,
        })
    }
}
