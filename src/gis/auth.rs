use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use super::transport::{TransportSettings, send_with_retry};
use super::{ArcGisClient, FeatureService, FeatureServiceProvider, GisError};
use crate::config::{ArcgisSettings, AuthSettings};

/// Exchange username and password for a session token via the portal's
/// `generateToken` endpoint.
pub async fn request_token(
	http: &reqwest::Client,
	auth: &AuthSettings,
	transport: &TransportSettings,
) -> Result<String, GisError> {
	let url = auth
		.url
		.as_deref()
		.ok_or_else(|| GisError::Auth("no authentication URL configured".into()))?;
	let username = auth
		.username
		.as_deref()
		.ok_or_else(|| GisError::Auth("no username configured".into()))?;

	let mut fields = vec![
		("f", "json".to_string()),
		("username", username.to_string()),
		("password", auth.password.clone().unwrap_or_default()),
		("request", auth.request.clone()),
	];
	if let Some(referer) = &auth.referer {
		fields.push(("referer", referer.clone()));
	}

	debug!("Requesting feature service token for '{}' from {}", username, url);
	let body = send_with_retry(transport, || http.post(url).form(&fields))
		.await
		.map_err(|e| match e {
			GisError::Remote(remote) => GisError::Auth(remote.to_string()),
			other => other,
		})?;

	body.get("token")
		.and_then(|t| t.as_str())
		.map(str::to_string)
		.ok_or_else(|| GisError::Auth("token response without 'token' field".into()))
}

/// Opens [`ArcGisClient`] sessions using the configured credentials.
pub struct ArcGisProvider {
	http: reqwest::Client,
	arcgis: ArcgisSettings,
	disable_updated_at: bool,
}

impl ArcGisProvider {
	pub fn new(arcgis: ArcgisSettings, disable_updated_at: bool) -> Result<Self, GisError> {
		let http = reqwest::Client::builder()
			.timeout(arcgis.transport.timeout())
			.build()?;

		Ok(Self {
			http,
			arcgis,
			disable_updated_at,
		})
	}
}

#[async_trait]
impl FeatureServiceProvider for ArcGisProvider {
	async fn open(&self) -> Result<Arc<dyn FeatureService>, GisError> {
		let token = request_token(
			&self.http,
			&self.arcgis.authentication,
			&self.arcgis.transport,
		)
		.await?;
		info!("Authenticated against feature service");

		Ok(Arc::new(ArcGisClient::new(
			self.http.clone(),
			self.arcgis.feature_service.service_url().unwrap_or_default(),
			token,
			self.arcgis.transport.clone(),
			self.disable_updated_at,
		)))
	}
}
