use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, info};
use sha2::{Digest, Sha256};

use super::store::{FeatureIndexStore, IndexEntry, IndexError};

/// Entries written per `write_batch` call on commit.
pub const COMMIT_BATCH_SIZE: usize = 500;

/// One-way key for an entity id: lowercase hex SHA-256 of its raw bytes.
pub fn hash_key(entity_id: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(entity_id.as_bytes());
	hex_helper::encode(hasher.finalize())
}

mod hex_helper {
	pub fn encode<T: AsRef<[u8]>>(data: T) -> String {
		data.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
	}
}

/// Local mapping from entity id to its remote feature, with buffered writes.
///
/// With `high_workload` the whole store is read once at open and lookups are
/// served from memory; otherwise every lookup is a point read. Writes are
/// buffered until [`commit`](Self::commit) and are visible to `get`
/// immediately.
pub struct ExistingFeatureIndex {
	store: Arc<dyn FeatureIndexStore>,
	preloaded: Option<HashMap<String, IndexEntry>>,
	pending: BTreeMap<String, IndexEntry>,
}

impl ExistingFeatureIndex {
	pub async fn open(store: Arc<dyn FeatureIndexStore>, high_workload: bool) -> Result<Self, IndexError> {
		let preloaded = if high_workload {
			let all: HashMap<String, IndexEntry> = store.get_all().await?.into_iter().collect();
			info!("Preloaded {} existing feature(s) into the index", all.len());
			Some(all)
		} else {
			None
		};

		Ok(Self {
			store,
			preloaded,
			pending: BTreeMap::new(),
		})
	}

	pub fn is_preloaded(&self) -> bool {
		self.preloaded.is_some()
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub async fn get(&self, entity_id: &str) -> Result<Option<IndexEntry>, IndexError> {
		let key = hash_key(entity_id);
		if let Some(entry) = self.pending.get(&key) {
			return Ok(Some(entry.clone()));
		}
		match &self.preloaded {
			Some(map) => Ok(map.get(&key).cloned()),
			None => self.store.get(&key).await,
		}
	}

	/// Buffer `entry` for `entity_id`.
	pub fn set(&mut self, entity_id: &str, entry: IndexEntry) {
		let key = hash_key(entity_id);
		if let Some(map) = self.preloaded.as_mut() {
			map.insert(key.clone(), entry.clone());
		}
		self.pending.insert(key, entry);
	}

	/// Flush buffered entries in batches. Entries stay buffered until the
	/// batch holding them is written, so a failed commit can be retried.
	/// Returns the number of entries written.
	pub async fn commit(&mut self) -> Result<usize, IndexError> {
		if self.pending.is_empty() {
			return Ok(0);
		}

		let entries: Vec<(String, IndexEntry)> = self
			.pending
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();

		let mut written = 0;
		for chunk in entries.chunks(COMMIT_BATCH_SIZE) {
			self.store.write_batch(chunk).await?;
			for (key, _) in chunk {
				self.pending.remove(key);
			}
			written += chunk.len();
		}

		debug!("Committed {} entries to the existence index", written);
		Ok(written)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::existence::MemoryIndexStore;

	fn entry(id: &str, layer: i64, oid: i64) -> IndexEntry {
		IndexEntry {
			entity_id: id.into(),
			layer_id: layer,
			object_id: oid,
		}
	}

	#[test]
	fn hash_is_stable_and_case_sensitive() {
		assert_eq!(
			hash_key("abc"),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
		assert_ne!(hash_key("abc"), hash_key("ABC"));
	}

	#[tokio::test]
	async fn set_is_visible_before_commit() {
		let store = Arc::new(MemoryIndexStore::new());
		let mut index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();

		index.set("A1", entry("A1", 0, 7));
		assert_eq!(index.get("A1").await.unwrap(), Some(entry("A1", 0, 7)));
		assert!(store.snapshot().await.is_empty());

		assert_eq!(index.commit().await.unwrap(), 1);
		assert_eq!(index.pending_len(), 0);
		assert_eq!(store.snapshot().await.get(&hash_key("A1")), Some(&entry("A1", 0, 7)));
	}

	#[tokio::test]
	async fn commit_is_safe_to_repeat() {
		let store = Arc::new(MemoryIndexStore::new());
		let mut index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();
		index.set("A1", entry("A1", 0, 7));
		index.commit().await.unwrap();
		assert_eq!(index.commit().await.unwrap(), 0);
		assert_eq!(store.batches_written(), 1);
	}

	#[tokio::test]
	async fn commit_writes_in_batches() {
		let store = Arc::new(MemoryIndexStore::new());
		let mut index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();
		for i in 0..1_201 {
			let id = format!("id-{}", i);
			index.set(&id, entry(&id, 0, i));
		}
		assert_eq!(index.commit().await.unwrap(), 1_201);
		assert_eq!(store.batches_written(), 3);
		assert_eq!(store.snapshot().await.len(), 1_201);
	}

	#[tokio::test]
	async fn failed_commit_keeps_the_buffer() {
		let store = Arc::new(MemoryIndexStore::new());
		let mut index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();
		index.set("A1", entry("A1", 0, 7));

		store.set_fail_writes(true);
		assert!(index.commit().await.is_err());
		assert_eq!(index.pending_len(), 1);

		store.set_fail_writes(false);
		assert_eq!(index.commit().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn preloaded_lookups_do_not_hit_the_store() {
		let store = Arc::new(MemoryIndexStore::new());
		store.insert(hash_key("A1"), entry("A1", 1, 3)).await;

		let mut index = ExistingFeatureIndex::open(store.clone(), true).await.unwrap();
		assert!(index.is_preloaded());
		assert_eq!(index.get("A1").await.unwrap(), Some(entry("A1", 1, 3)));
		assert_eq!(index.get("B2").await.unwrap(), None);
		assert_eq!(store.point_reads(), 0);

		index.set("B2", entry("B2", 0, 4));
		index.commit().await.unwrap();
		assert_eq!(index.get("B2").await.unwrap(), Some(entry("B2", 0, 4)));
	}

	#[tokio::test]
	async fn point_reads_without_preload() {
		let store = Arc::new(MemoryIndexStore::new());
		store.insert(hash_key("A1"), entry("A1", 1, 3)).await;
		let index = ExistingFeatureIndex::open(store.clone(), false).await.unwrap();
		assert_eq!(index.get("A1").await.unwrap(), Some(entry("A1", 1, 3)));
		assert_eq!(store.point_reads(), 1);
	}
}
