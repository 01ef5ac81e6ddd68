use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::store::{FeatureIndexStore, IndexEntry, IndexError};

/// Existence index persisted in PostgreSQL. Rows are namespaced by `kind`
/// (the feature service id) so several connectors can share one table.
pub struct PgIndexStore {
	pool: PgPool,
	table: String,
	kind: String,
}

/// Keep identifier characters only; the table name is interpolated into SQL.
fn sanitize_table(name: &str) -> String {
	let out: String = name
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || *c == '_')
		.collect();
	if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
		format!("existing_features{}", out)
	} else {
		out
	}
}

impl PgIndexStore {
	pub fn new(pool: PgPool, table: &str, kind: impl Into<String>) -> Self {
		Self {
			pool,
			table: sanitize_table(table),
			kind: kind.into(),
		}
	}

	/// Connect and make sure the table exists.
	pub async fn connect(database_url: &str, table: &str, kind: &str) -> Result<Self> {
		let pool = PgPool::connect(database_url)
			.await
			.context("connecting to the existence index database")?;
		let store = Self::new(pool, table, kind);
		store.ensure_schema().await?;
		Ok(store)
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = format!(
			"CREATE TABLE IF NOT EXISTS {t} (
				kind TEXT NOT NULL,
				key TEXT NOT NULL,
				entity_id TEXT NOT NULL,
				layer_id BIGINT NOT NULL,
				object_id BIGINT NOT NULL,
				PRIMARY KEY (kind, key)
			)",
			t = self.table
		);
		sqlx::query(&sql)
			.execute(&self.pool)
			.await
			.with_context(|| format!("creating table {}", self.table))?;
		Ok(())
	}

	pub fn table(&self) -> &str {
		&self.table
	}
}

#[async_trait]
impl FeatureIndexStore for PgIndexStore {
	async fn get(&self, key: &str) -> Result<Option<IndexEntry>, IndexError> {
		let sql = format!(
			"SELECT entity_id, layer_id, object_id FROM {} WHERE kind = $1 AND key = $2",
			self.table
		);
		let row: Option<(String, i64, i64)> = sqlx::query_as(&sql)
			.bind(&self.kind)
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|(entity_id, layer_id, object_id)| IndexEntry {
			entity_id,
			layer_id,
			object_id,
		}))
	}

	async fn get_all(&self) -> Result<Vec<(String, IndexEntry)>, IndexError> {
		let sql = format!(
			"SELECT key, entity_id, layer_id, object_id FROM {} WHERE kind = $1",
			self.table
		);
		let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(&sql)
			.bind(&self.kind)
			.fetch_all(&self.pool)
			.await?;
		Ok(rows
			.into_iter()
			.map(|(key, entity_id, layer_id, object_id)| {
				(
					key,
					IndexEntry {
						entity_id,
						layer_id,
						object_id,
					},
				)
			})
			.collect())
	}

	async fn write_batch(&self, entries: &[(String, IndexEntry)]) -> Result<(), IndexError> {
		if entries.is_empty() {
			return Ok(());
		}

		let mut keys = Vec::with_capacity(entries.len());
		let mut entity_ids = Vec::with_capacity(entries.len());
		let mut layer_ids = Vec::with_capacity(entries.len());
		let mut object_ids = Vec::with_capacity(entries.len());
		for (key, entry) in entries {
			keys.push(key.clone());
			entity_ids.push(entry.entity_id.clone());
			layer_ids.push(entry.layer_id);
			object_ids.push(entry.object_id);
		}

		let sql = format!(
			"INSERT INTO {t} (kind, key, entity_id, layer_id, object_id)
			SELECT $1, k, e, l, o FROM UNNEST($2::text[], $3::text[], $4::bigint[], $5::bigint[]) AS u(k, e, l, o)
			ON CONFLICT (kind, key) DO UPDATE SET
				entity_id = EXCLUDED.entity_id,
				layer_id = EXCLUDED.layer_id,
				object_id = EXCLUDED.object_id",
			t = self.table
		);

		let mut tx = self.pool.begin().await?;
		sqlx::query(&sql)
			.bind(&self.kind)
			.bind(&keys)
			.bind(&entity_ids)
			.bind(&layer_ids)
			.bind(&object_ids)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}
}
