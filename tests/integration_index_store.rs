use std::env;
use std::sync::Arc;

use arcgis_sync::existence::{
	COMMIT_BATCH_SIZE, ExistingFeatureIndex, FeatureIndexStore, IndexEntry, PgIndexStore, hash_key,
};

/// Connect to `TEST_DATABASE_URL` with a per-test namespace, or skip.
async fn store(kind: &str) -> Option<PgIndexStore> {
	let Ok(url) = env::var("TEST_DATABASE_URL") else {
		eprintln!("Skipping PostgreSQL test; set TEST_DATABASE_URL to enable");
		return None;
	};
	let kind = format!("{}-{}", kind, std::process::id());
	Some(
		PgIndexStore::connect(&url, "existing_features_test", &kind)
			.await
			.expect("connect to test database"),
	)
}

fn entry(id: &str, layer_id: i64, object_id: i64) -> (String, IndexEntry) {
	(
		hash_key(id),
		IndexEntry {
			entity_id: id.into(),
			layer_id,
			object_id,
		},
	)
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_write_batch_upserts() {
	let Some(store) = store("upsert").await else {
		return;
	};
	assert_eq!(store.table(), "existing_features_test");

	store.write_batch(&[entry("A1", 0, 7), entry("B2", 1, 8)]).await.unwrap();
	store.write_batch(&[entry("A1", 2, 9)]).await.unwrap();

	assert_eq!(store.get(&hash_key("A1")).await.unwrap(), Some(entry("A1", 2, 9).1));
	assert_eq!(store.get(&hash_key("B2")).await.unwrap(), Some(entry("B2", 1, 8).1));
	assert_eq!(store.get(&hash_key("C3")).await.unwrap(), None);

	let mut all = store.get_all().await.unwrap();
	all.sort_by(|a, b| a.1.entity_id.cmp(&b.1.entity_id));
	assert_eq!(all, vec![entry("A1", 2, 9), entry("B2", 1, 8)]);
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_namespaces_do_not_overlap() {
	let (Some(a), Some(b)) = (store("ns-a").await, store("ns-b").await) else {
		return;
	};

	a.write_batch(&[entry("A1", 0, 7)]).await.unwrap();
	assert_eq!(b.get(&hash_key("A1")).await.unwrap(), None);
	assert!(b.get_all().await.unwrap().is_empty());
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_index_commits_large_batches() {
	let Some(store) = store("large").await else {
		return;
	};
	let store = Arc::new(store);

	let mut index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();
	let n = COMMIT_BATCH_SIZE + 20;
	for i in 0..n {
		let (_, e) = entry(&format!("E{}", i), 0, i as i64);
		index.set(&e.entity_id.clone(), e);
	}
	assert_eq!(index.commit().await.unwrap(), n);
	assert_eq!(index.pending_len(), 0);

	let reopened = ExistingFeatureIndex::open(store.clone(), true).await.unwrap();
	assert!(reopened.is_preloaded());
	assert_eq!(reopened.get("E3").await.unwrap().map(|e| e.object_id), Some(3));
	assert_eq!(store.get_all().await.unwrap().len(), n);
}
