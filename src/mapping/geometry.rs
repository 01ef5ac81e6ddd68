use std::f64::consts::PI;

use log::warn;
use serde_json::{Value, json};

use super::path;

/// Half the circumference of the EPSG:3857 sphere, in metres.
const WEB_MERCATOR_EXTENT: f64 = 20_037_508.342_789_244;
/// Latitude beyond which web mercator is undefined.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
	/// Emit the source values unchanged.
	Default,
	/// Reproject from EPSG:4326 to EPSG:3857.
	Wgs84WebMercator,
}

impl ConversionMode {
	pub fn parse(name: &str) -> Option<Self> {
		match name {
			"default" => Some(Self::Default),
			"wgs84-web_mercator" => Some(Self::Wgs84WebMercator),
			_ => None,
		}
	}
}

/// Where to find the coordinates in a source item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateSpec {
	pub longitude: String,
	pub latitude: String,
	pub conversion: Option<ConversionMode>,
}

/// Project a WGS84 longitude/latitude pair onto web mercator metres.
pub fn wgs84_to_web_mercator(longitude: f64, latitude: f64) -> (f64, f64) {
	let lat = latitude.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
	let x = longitude * WEB_MERCATOR_EXTENT / 180.0;
	let y = ((90.0 + lat) * PI / 360.0).tan().ln() / (PI / 180.0) * WEB_MERCATOR_EXTENT / 180.0;
	(x, y)
}

fn as_f64(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

impl CoordinateSpec {
	/// Build the `{x, y}` geometry for one source item.
	///
	/// Without conversion the pair is emitted in latitude-first axis order:
	/// `x` carries the latitude value and `y` the longitude value. With
	/// web mercator conversion `x` is the easting and `y` the northing.
	/// Returns `None` when conversion is requested but the values are not
	/// numeric.
	pub fn build(&self, source: &Value) -> Option<Value> {
		let longitude = path::get_path(source, &self.longitude).cloned().unwrap_or(Value::Null);
		let latitude = path::get_path(source, &self.latitude).cloned().unwrap_or(Value::Null);

		match self.conversion {
			Some(ConversionMode::Wgs84WebMercator) => {
				match (as_f64(&longitude), as_f64(&latitude)) {
					(Some(lon), Some(lat)) => {
						let (x, y) = wgs84_to_web_mercator(lon, lat);
						Some(json!({"x": x, "y": y}))
					}
					_ => {
						warn!(
							"Coordinates ({}, {}) are not numeric, cannot convert to web mercator",
							longitude, latitude
						);
						None
					}
				}
			}
			Some(ConversionMode::Default) | None => Some(json!({"x": latitude, "y": longitude})),
		}
	}
}
