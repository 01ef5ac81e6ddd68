//! Client side of the remote feature-service REST protocol.
//!
//! The rest of the crate talks to the service through the
//! [`FeatureService`] trait so tests can substitute an in-process double.
//! [`ArcGisClient`] is the production implementation over `reqwest`.

pub mod auth;
pub mod client;
pub mod transport;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::attachments::Attachment;

pub use auth::{ArcGisProvider, request_token};
pub use client::ArcGisClient;
pub use transport::TransportSettings;
pub use types::{ApplyEditsResponse, AttachmentInfo, EditResult, Feature, RemoteError};

/// Errors surfaced by feature-service calls once retries are exhausted.
#[derive(Debug, Error)]
pub enum GisError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("HTTP error status: {0}")]
	Status(u16),

	#[error("malformed JSON response: {0}")]
	Decode(String),

	#[error("feature service error: {0}")]
	Remote(RemoteError),

	#[error("authentication failed: {0}")]
	Auth(String),

	#[error("max retries exceeded after {attempts} attempts: {last}")]
	MaxRetriesExceeded { attempts: u32, last: String },
}

impl GisError {
	/// Whether the transport should try the request again.
	pub fn is_retryable(&self) -> bool {
		match self {
			GisError::Http(_) | GisError::Decode(_) => true,
			GisError::Status(status) => {
				matches!(status, 404 | 408 | 429) || (500..600).contains(status)
			}
			_ => false,
		}
	}
}

/// Operations the connector needs from a feature service.
#[async_trait]
pub trait FeatureService: Send + Sync {
	/// Apply adds, updates and deletes to one layer in a single call.
	/// Returns an empty response without contacting the service when all
	/// three lists are empty.
	async fn apply_edits(
		&self,
		layer_id: i64,
		adds: &[Value],
		updates: &[Value],
		deletes: &[i64],
	) -> Result<ApplyEditsResponse, GisError>;

	async fn query(
		&self,
		layer_id: i64,
		where_clause: &str,
		out_fields: &[&str],
	) -> Result<Vec<Feature>, GisError>;

	/// Upload a file to a feature and return the new attachment id.
	async fn add_attachment(
		&self,
		layer_id: i64,
		feature_id: i64,
		attachment: &Attachment,
	) -> Result<i64, GisError>;

	async fn get_attachments(
		&self,
		layer_id: i64,
		feature_id: i64,
	) -> Result<Vec<AttachmentInfo>, GisError>;

	async fn delete_attachments(
		&self,
		layer_id: i64,
		feature_id: i64,
		attachment_ids: &[i64],
	) -> Result<Vec<EditResult>, GisError>;

	/// Delete features together with their attachments.
	async fn delete_features(
		&self,
		layer_id: i64,
		object_ids: &[i64],
	) -> Result<Vec<EditResult>, GisError>;
}

/// Opens an authenticated feature-service session. A fresh session is
/// opened for every sync run so expired tokens never leak between runs.
#[async_trait]
pub trait FeatureServiceProvider: Send + Sync + 'static {
	async fn open(&self) -> Result<Arc<dyn FeatureService>, GisError>;
}
