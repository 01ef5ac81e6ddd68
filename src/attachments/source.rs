use async_trait::async_trait;
use log::{error, info};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::gis::TransportSettings;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// A downloaded attachment, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
	pub content_type: String,
	pub file_name: String,
	pub bytes: Vec<u8>,
}

/// Resolves an attachment reference to its content.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
	/// `None` when the reference is invalid or cannot be downloaded.
	async fn fetch(&self, reference: &str) -> Option<Attachment>;
}

/// Fetches `http(s)://` URLs directly and `gs://bucket/object` references
/// through the public storage endpoint.
#[derive(Debug, Clone)]
pub struct HttpAttachmentSource {
	http: reqwest::Client,
	bearer_token: Option<String>,
	storage_endpoint: String,
}

impl HttpAttachmentSource {
	pub fn new(transport: &TransportSettings, bearer_token: Option<String>) -> Result<Self, reqwest::Error> {
		let http = reqwest::Client::builder()
			.timeout(transport.timeout())
			.build()?;
		Ok(Self::with_client(http, bearer_token))
	}

	pub fn with_client(http: reqwest::Client, bearer_token: Option<String>) -> Self {
		Self {
			http,
			bearer_token: bearer_token.filter(|t| !t.is_empty()),
			storage_endpoint: GCS_ENDPOINT.to_string(),
		}
	}

	/// Override the object storage endpoint `gs://` references resolve to.
	pub fn with_storage_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.storage_endpoint = endpoint.into().trim_end_matches('/').to_string();
		self
	}

	/// Translate a reference into a downloadable URL.
	pub fn resolve(&self, reference: &str) -> Option<Url> {
		let parsed = Url::parse(reference.trim()).ok()?;
		match parsed.scheme() {
			"http" | "https" => Some(parsed),
			"gs" => {
				let bucket = parsed.host_str().filter(|b| !b.is_empty())?;
				let object = parsed.path().trim_start_matches('/');
				if object.is_empty() {
					return None;
				}
				Url::parse(&format!("{}/{}/{}", self.storage_endpoint, bucket, object)).ok()
			}
			_ => None,
		}
	}
}

/// Last path segment of the reference.
pub fn file_name_of(url: &Url) -> String {
	url.path_segments()
		.and_then(|mut s| s.next_back())
		.filter(|s| !s.is_empty())
		.unwrap_or("attachment")
		.to_string()
}

fn guess_content_type(file_name: &str) -> String {
	mime_guess::from_path(file_name)
		.first_raw()
		.unwrap_or(DEFAULT_CONTENT_TYPE)
		.to_string()
}

#[async_trait]
impl AttachmentSource for HttpAttachmentSource {
	async fn fetch(&self, reference: &str) -> Option<Attachment> {
		let Some(url) = self.resolve(reference) else {
			error!(
				"Attachment '{}' is not a valid URL or storage reference, skipping upload",
				reference
			);
			return None;
		};

		let mut request = self.http.get(url.clone());
		if let Some(token) = &self.bearer_token {
			request = request.bearer_auth(token);
		}

		let response = match request.send().await.and_then(|r| r.error_for_status()) {
			Ok(r) => r,
			Err(e) => {
				error!(
					"Attachment '{}' cannot be downloaded, skipping upload: {}",
					reference, e
				);
				return None;
			}
		};

		let file_name = file_name_of(&url);
		let content_type = response
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.filter(|v| !v.is_empty())
			.map(str::to_string)
			.unwrap_or_else(|| guess_content_type(&file_name));

		match response.bytes().await {
			Ok(bytes) => {
				info!("Successfully downloaded attachment '{}'", reference);
				Some(Attachment {
					content_type,
					file_name,
					bytes: bytes.to_vec(),
				})
			}
			Err(e) => {
				error!(
					"Attachment '{}' cannot be downloaded, skipping upload: {}",
					reference, e
				);
				None
			}
		}
	}
}
