use std::path::Path;

use log::{Level, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::gis::TransportSettings;
use crate::mapping::ConversionMode;

/// Runtime configuration for the connector.
///
/// Values are loaded from (in order): `/etc/arcgis-sync/config.{yaml,json,toml}`,
/// the user config folder (optional), an explicit file passed on the command
/// line, and environment variables prefixed with `ARCSYNC_` where nested keys
/// are separated by `__` (e.g. `ARCSYNC_ARCGIS__AUTHENTICATION__PASSWORD`).
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	pub log_level: Level,
	/// Shortcut that forces debug logging regardless of `log_level`.
	pub debug_logging: bool,
	/// Preload the whole existence index at startup.
	pub high_workload: bool,
	/// `arcgis` or `firestore`; anything else disables existence checks.
	pub existence_check: Option<String>,
	pub arcgis: ArcgisSettings,
	pub index_store: IndexStoreSettings,
	pub attachments: AttachmentSettings,
	pub mapping: MappingSettings,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 8080,
			log_level: Level::Info,
			debug_logging: false,
			high_workload: false,
			existence_check: None,
			arcgis: ArcgisSettings::default(),
			index_store: IndexStoreSettings::default(),
			attachments: AttachmentSettings::default(),
			mapping: MappingSettings::default(),
		}
	}
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct ArcgisSettings {
	pub authentication: AuthSettings,
	pub feature_service: FeatureServiceSettings,
	pub transport: TransportSettings,
}

#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct AuthSettings {
	pub url: Option<String>,
	pub username: Option<String>,
	pub password: Option<String>,
	pub request: String,
	pub referer: Option<String>,
}

impl Default for AuthSettings {
	fn default() -> Self {
		Self {
			url: None,
			username: None,
			password: None,
			request: "gettoken".to_string(),
			referer: None,
		}
	}
}

impl std::fmt::Debug for AuthSettings {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AuthSettings")
			.field("url", &self.url)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
			.field("request", &self.request)
			.field("referer", &self.referer)
			.finish()
	}
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct FeatureServiceSettings {
	pub url: Option<String>,
	/// Feature service id; also namespaces the existence index.
	pub id: Option<String>,
	/// Allowed layer ids, in the order they are searched.
	pub layers: Vec<i64>,
}

impl FeatureServiceSettings {
	pub fn service_url(&self) -> Option<String> {
		self.url
			.as_deref()
			.map(|u| u.trim_end_matches('/').to_string())
	}
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct IndexStoreSettings {
	/// PostgreSQL URL. Without it the index lives in memory only.
	pub database_url: Option<String>,
	pub table: String,
}

impl Default for IndexStoreSettings {
	fn default() -> Self {
		Self {
			database_url: None,
			table: "existing_features".to_string(),
		}
	}
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct AttachmentSettings {
	/// Bearer token sent when downloading attachments.
	pub bearer_token: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct MappingSettings {
	pub data_source: Option<String>,
	/// Attachment field paths, relative to `attributes`.
	pub attachments: Vec<String>,
	/// Entity id path, relative to `attributes`.
	pub id_field: Option<String>,
	/// Layer id path in the source item.
	pub layer_field: Option<String>,
	pub coordinates: Option<CoordinateSettings>,
	pub fields: Value,
	pub disable_updated_at: bool,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
pub struct CoordinateSettings {
	pub longitude: String,
	pub latitude: String,
	#[serde(default = "default_conversion")]
	pub conversion: String,
}

fn default_conversion() -> String {
	"default".to_string()
}

impl CoordinateSettings {
	/// Unsupported conversion names select no conversion.
	pub fn conversion_mode(&self) -> Option<ConversionMode> {
		let mode = ConversionMode::parse(&self.conversion);
		if mode.is_none() {
			warn!(
				"Coordinate conversion '{}' is not supported, supported types: 'default', 'wgs84-web_mercator'",
				self.conversion
			);
		}
		mode
	}
}

/// Which mechanism decides whether an entity already has a remote feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceMode {
	/// Query the feature layers directly.
	Arcgis,
	/// Consult the local existence index.
	Firestore,
}

impl Settings {
	/// Resolve the configured existence check. Unknown values are logged
	/// and disable the check.
	pub fn existence_mode(&self) -> Option<ExistenceMode> {
		match self.existence_check.as_deref() {
			Some("arcgis") => Some(ExistenceMode::Arcgis),
			Some("firestore") => Some(ExistenceMode::Firestore),
			Some(other) => {
				warn!(
					"The existence check value '{}' is not supported, supported types: 'arcgis', 'firestore'",
					other
				);
				None
			}
			None => None,
		}
	}

	pub fn effective_log_level(&self) -> Level {
		if self.debug_logging {
			Level::Debug
		} else {
			self.log_level
		}
	}

	/// Check that every key a sync run depends on is present.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let fields_present = match &self.mapping.fields {
			Value::Object(map) => !map.is_empty(),
			_ => false,
		};
		if !fields_present {
			return Err(ConfigError::Missing("mapping.fields"));
		}
		if is_blank(&self.mapping.id_field) {
			return Err(ConfigError::Missing("mapping.id_field"));
		}
		if is_blank(&self.arcgis.authentication.url) {
			return Err(ConfigError::Missing("arcgis.authentication.url"));
		}
		if is_blank(&self.arcgis.authentication.username) {
			return Err(ConfigError::Missing("arcgis.authentication.username"));
		}
		if is_blank(&self.arcgis.feature_service.url) {
			return Err(ConfigError::Missing("arcgis.feature_service.url"));
		}
		if is_blank(&self.arcgis.feature_service.id) {
			return Err(ConfigError::Missing("arcgis.feature_service.id"));
		}
		Ok(())
	}
}

fn is_blank(value: &Option<String>) -> bool {
	value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// A required configuration key is absent.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
	#[error("missing required configuration key '{0}'")]
	Missing(&'static str),
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load(path: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/arcgis-sync/config").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("arcgis-sync").join("config");
		if let Some(p) = user_config_path.to_str() {
			builder = builder.add_source(config::File::with_name(p).required(false));
		}
	}
	if let Some(p) = path {
		builder = builder.add_source(config::File::from(p).required(true));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("ARCSYNC")
			.prefix_separator("_")
			.separator("__")
			.try_parsing(true),
	);

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct overrides for the values most often injected by the runtime
	// (container port, log level, the service password from a secret store).
	if let Ok(h) = std::env::var("ARCSYNC_HOST") {
		if !h.is_empty() {
			s.host = h;
		}
	}
	if let Ok(p) = std::env::var("ARCSYNC_PORT") {
		if let Ok(pn) = p.parse::<u16>() {
			s.port = pn;
		}
	}
	if let Ok(l) = std::env::var("ARCSYNC_LOG_LEVEL") {
		if let Ok(parsed) = l.parse::<Level>() {
			s.log_level = parsed;
		}
	}
	if let Ok(pw) = std::env::var("ARCSYNC_ARCGIS_PASSWORD") {
		if !pw.is_empty() {
			s.arcgis.authentication.password = Some(pw);
		}
	}

	Ok(s)
}
