use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Where an entity's remote feature lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
	pub entity_id: String,
	pub layer_id: i64,
	pub object_id: i64,
}

#[derive(Debug, Error)]
pub enum IndexError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("index store unavailable: {0}")]
	Unavailable(String),
}

/// Persistent side of the existence index. Keys are already hashed.
#[async_trait]
pub trait FeatureIndexStore: Send + Sync + 'static {
	async fn get(&self, key: &str) -> Result<Option<IndexEntry>, IndexError>;

	async fn get_all(&self) -> Result<Vec<(String, IndexEntry)>, IndexError>;

	/// Upsert all entries in one write.
	async fn write_batch(&self, entries: &[(String, IndexEntry)]) -> Result<(), IndexError>;
}

/// Non-persistent store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
	entries: Mutex<HashMap<String, IndexEntry>>,
	batches: AtomicUsize,
	point_reads: AtomicUsize,
	fail_writes: AtomicBool,
}

impl MemoryIndexStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed the store directly, bypassing batch accounting.
	pub async fn insert(&self, key: impl Into<String>, entry: IndexEntry) {
		self.entries.lock().await.insert(key.into(), entry);
	}

	pub async fn snapshot(&self) -> HashMap<String, IndexEntry> {
		self.entries.lock().await.clone()
	}

	/// Number of `write_batch` calls that succeeded.
	pub fn batches_written(&self) -> usize {
		self.batches.load(Ordering::SeqCst)
	}

	/// Number of `get` calls served.
	pub fn point_reads(&self) -> usize {
		self.point_reads.load(Ordering::SeqCst)
	}

	/// Make subsequent writes fail until reset.
	pub fn set_fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}
}

#[async_trait]
impl FeatureIndexStore for MemoryIndexStore {
	async fn get(&self, key: &str) -> Result<Option<IndexEntry>, IndexError> {
		self.point_reads.fetch_add(1, Ordering::SeqCst);
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn get_all(&self) -> Result<Vec<(String, IndexEntry)>, IndexError> {
		Ok(self
			.entries
			.lock()
			.await
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect())
	}

	async fn write_batch(&self, entries: &[(String, IndexEntry)]) -> Result<(), IndexError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(IndexError::Unavailable("writes disabled".into()));
		}
		let mut map = self.entries.lock().await;
		for (k, v) in entries {
			map.insert(k.clone(), v.clone());
		}
		self.batches.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}
