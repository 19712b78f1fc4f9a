// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP implementation of the mapping backend.

use async_trait::async_trait;
use cadmap_core::{
    CadNode, DmConnection, ModelRevisionId, NamespacedInstanceId, NodeId, RawAssetMapping,
    TreeIndex,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{InstanceInspection, MappingBackend, MappingFilter, Page};
use crate::error::{MappingError, Result};

/// Connection settings for the remote mapping backend.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Bearer token, if the backend requires authentication.
    pub api_key: Option<String>,
}

impl HttpBackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MAPPING_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            api_key: std::env::var("MAPPING_API_KEY").ok(),
        }
    }
}

/// Mapping backend client over HTTP.
pub struct HttpMappingBackend {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    asset_ids: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_ids: Option<Vec<NodeId>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingListBody {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<FilterSpec>,
}

#[derive(Debug, Serialize)]
struct ItemsBody<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DmListBody<'a> {
    models: &'a [ModelRevisionId],
    #[serde(skip_serializing_if = "Option::is_none")]
    instances: Option<&'a [NamespacedInstanceId]>,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

impl HttpMappingBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            http: reqwest::Client::new(),
        }
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        context: &'static str,
    ) -> Result<R> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MappingError::Request(format!("{context}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MappingError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| MappingError::Decode(format!("{context}: {e}")))
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str, context: &'static str) -> Result<R> {
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MappingError::Request(format!("{context}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MappingError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| MappingError::Decode(format!("{context}: {e}")))
    }

    fn revision_path(model: ModelRevisionId, tail: &str) -> String {
        format!(
            "/api/v1/models/{}/revisions/{}/{}",
            model.model_id, model.revision_id, tail
        )
    }
}

#[async_trait]
impl MappingBackend for HttpMappingBackend {
    async fn filter_asset_mappings(
        &self,
        model: ModelRevisionId,
        filter: &MappingFilter,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<RawAssetMapping>> {
        let filter = match filter {
            MappingFilter::All => None,
            MappingFilter::InstanceIds(ids) => Some(FilterSpec {
                asset_ids: Some(ids.clone()),
                node_ids: None,
            }),
            MappingFilter::NodeIds(ids) => Some(FilterSpec {
                asset_ids: None,
                node_ids: Some(ids.clone()),
            }),
        };
        let body = MappingListBody {
            limit,
            cursor,
            filter,
        };
        self.post_json(
            &Self::revision_path(model, "mappings/list"),
            &body,
            "asset mapping listing",
        )
        .await
    }

    async fn nodes_by_ids(
        &self,
        model: ModelRevisionId,
        node_ids: &[NodeId],
    ) -> Result<Vec<CadNode>> {
        let body = ItemsBody {
            items: node_ids.to_vec(),
        };
        let items: Items<CadNode> = self
            .post_json(
                &Self::revision_path(model, "nodes/byids"),
                &body,
                "node lookup",
            )
            .await?;
        Ok(items.items)
    }

    async fn nodes_by_tree_indexes(
        &self,
        model: ModelRevisionId,
        tree_indexes: &[TreeIndex],
    ) -> Result<Vec<CadNode>> {
        let body = ItemsBody {
            items: tree_indexes.to_vec(),
        };
        let items: Items<CadNode> = self
            .post_json(
                &Self::revision_path(model, "nodes/bytreeindexes"),
                &body,
                "node lookup by tree index",
            )
            .await?;
        Ok(items.items)
    }

    async fn ancestor_nodes(
        &self,
        model: ModelRevisionId,
        tree_index: TreeIndex,
    ) -> Result<Vec<CadNode>> {
        let path = Self::revision_path(model, &format!("nodes/{tree_index}/ancestors"));
        let items: Items<CadNode> = self.get_json(&path, "ancestor lookup").await?;
        Ok(items.items)
    }

    async fn filter_dm_connections(
        &self,
        models: &[ModelRevisionId],
        instances: Option<&[NamespacedInstanceId]>,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<DmConnection>> {
        let body = DmListBody {
            models,
            instances,
            limit,
            cursor,
        };
        self.post_json("/api/v1/dm/mappings/list", &body, "DM connection listing")
            .await
    }

    async fn inspect_instances(
        &self,
        instances: &[NamespacedInstanceId],
    ) -> Result<Vec<InstanceInspection>> {
        let body = ItemsBody {
            items: instances.to_vec(),
        };
        let items: Items<InstanceInspection> = self
            .post_json("/api/v1/dm/instances/inspect", &body, "instance inspection")
            .await?;
        Ok(items.items)
    }
}
