// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unified cache composition: partitioning, merging and bounded parallelism.

mod support;

use cadmap_cache::{CacheConfig, UnifiedMappingCache};
use cadmap_core::{
    InstanceKey, InstanceReference, ModelRevisionId, NamespacedInstanceId, RawAssetMapping,
    TreeIndexMapping,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{cad_node, classic_record, dm_connection, FakeBackend};

const MODEL_A: ModelRevisionId = ModelRevisionId {
    model_id: 1,
    revision_id: 100,
};

fn seeded_backend() -> FakeBackend {
    let mut backend = FakeBackend::new();
    backend
        .mappings
        .insert(MODEL_A, vec![classic_record(10, 5, 1)]);
    backend
        .nodes
        .insert(MODEL_A, vec![cad_node(10, 5, 1), cad_node(20, 8, 1)]);
    backend
        .connections
        .push(dm_connection(MODEL_A, "plant", "pump-01", 8));
    backend
}

fn cache(backend: FakeBackend) -> (UnifiedMappingCache, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let cache = UnifiedMappingCache::new(backend.clone(), CacheConfig::default());
    (cache, backend)
}

fn namespaced(space: &str, external_id: &str) -> InstanceKey {
    InstanceKey::Namespaced {
        space: space.into(),
        external_id: external_id.into(),
    }
}

#[tokio::test]
async fn test_empty_inputs_short_circuit_without_requests() {
    let (cache, backend) = cache(seeded_backend());

    let no_instances = cache
        .get_mappings_for_models_and_instances(&[], &[MODEL_A])
        .await
        .unwrap();
    let no_models = cache
        .get_mappings_for_models_and_instances(&[InstanceReference::Classic(1)], &[])
        .await
        .unwrap();
    let no_listing_models = cache.get_all_model_mappings(&[]).await.unwrap();

    assert!(no_instances.is_empty());
    assert!(no_models.is_empty());
    assert!(no_listing_models.is_empty());
    assert_eq!(backend.log.filter_calls(), 0);
    assert_eq!(backend.log.dm_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mixed_instances_merge_per_model() {
    let (cache, _) = cache(seeded_backend());
    let instances = [
        InstanceReference::Classic(1),
        InstanceReference::Namespaced(NamespacedInstanceId::new("plant", "pump-01")),
    ];

    let result = cache
        .get_mappings_for_models_and_instances(&instances, &[MODEL_A])
        .await
        .unwrap();

    let table = &result[&MODEL_A];
    assert_eq!(table[&InstanceKey::Classic(1)], vec![cad_node(10, 5, 1)]);
    assert_eq!(
        table[&namespaced("plant", "pump-01")],
        vec![cad_node(20, 8, 1)]
    );
}

#[tokio::test]
async fn test_classic_only_input_skips_dm_backend() {
    let (cache, backend) = cache(seeded_backend());

    cache
        .get_mappings_for_models_and_instances(&[InstanceReference::Classic(1)], &[MODEL_A])
        .await
        .unwrap();
    assert_eq!(backend.log.dm_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_namespaced_only_input_skips_classic_backend() {
    let (cache, backend) = cache(seeded_backend());
    let instances = [InstanceReference::Namespaced(NamespacedInstanceId::new(
        "plant", "pump-01",
    ))];

    cache
        .get_mappings_for_models_and_instances(&instances, &[MODEL_A])
        .await
        .unwrap();
    assert_eq!(backend.log.filter_calls(), 0);
    assert_eq!(backend.log.dm_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_model_mappings_merges_both_sources() {
    let (cache, backend) = cache(seeded_backend());

    let result = cache.get_all_model_mappings(&[MODEL_A]).await.unwrap();
    let table = &result[&MODEL_A];
    assert_eq!(
        table[&InstanceKey::Classic(1)],
        vec![TreeIndexMapping {
            tree_index: 5,
            subtree_size: 1
        }]
    );
    assert_eq!(
        table[&namespaced("plant", "pump-01")],
        vec![TreeIndexMapping {
            tree_index: 8,
            subtree_size: 1
        }]
    );

    // A second call is served entirely from the memoized listings
    let filter_calls = backend.log.filter_calls();
    let dm_calls = backend.log.dm_calls.load(Ordering::SeqCst);
    cache.get_all_model_mappings(&[MODEL_A]).await.unwrap();
    assert_eq!(backend.log.filter_calls(), filter_calls);
    assert_eq!(backend.log.dm_calls.load(Ordering::SeqCst), dm_calls);
}

#[tokio::test]
async fn test_hybrid_key_concatenates_across_sources() {
    let mut backend = FakeBackend::new();
    // The classic listing carries a hybrid record for pump-01 on node 10;
    // the DM listing maps the same instance to node 20.
    backend.mappings.insert(
        MODEL_A,
        vec![RawAssetMapping {
            node_id: 10,
            tree_index: Some(5),
            subtree_size: Some(1),
            asset_id: Some(7),
            instance: Some(NamespacedInstanceId::new("plant", "pump-01")),
        }],
    );
    backend
        .nodes
        .insert(MODEL_A, vec![cad_node(10, 5, 1), cad_node(20, 8, 1)]);
    backend
        .connections
        .push(dm_connection(MODEL_A, "plant", "pump-01", 8));
    let (cache, _) = cache(backend);

    let result = cache.get_all_model_mappings(&[MODEL_A]).await.unwrap();
    let table = &result[&MODEL_A];

    assert_eq!(table[&InstanceKey::Classic(7)].len(), 1);
    // Both sources contribute, classic first, nothing overwritten
    assert_eq!(
        table[&namespaced("plant", "pump-01")],
        vec![
            TreeIndexMapping {
                tree_index: 5,
                subtree_size: 1
            },
            TreeIndexMapping {
                tree_index: 8,
                subtree_size: 1
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_model_queries_are_bounded() {
    let mut backend = FakeBackend::new();
    let models: Vec<ModelRevisionId> = (0u64..6).map(|i| ModelRevisionId::new(i, i)).collect();
    for &model in &models {
        backend.mappings.insert(model, vec![classic_record(10, 5, 1)]);
        backend.nodes.insert(model, vec![cad_node(10, 5, 1)]);
    }
    let (cache, backend) = cache(backend);

    cache
        .get_mappings_for_models_and_instances(&[InstanceReference::Classic(1)], &models)
        .await
        .unwrap();

    assert_eq!(backend.log.filter_calls(), 6);
    assert!(backend.log.max_in_flight.load(Ordering::SeqCst) <= 2);
}
