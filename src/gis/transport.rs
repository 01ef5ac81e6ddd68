use std::time::Duration;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;

use super::GisError;

/// Retry and timeout behaviour for calls to the feature service.
///
/// Transient failures (connection errors, timeouts, 404/408/429/5xx and
/// undecodable JSON bodies) are retried with exponential backoff plus
/// jitter. Error payloads returned by the service itself are not retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSettings {
	/// Request timeout in milliseconds
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,

	/// Maximum number of retry attempts after the first request
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,

	/// Initial backoff delay in milliseconds
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,

	/// Maximum backoff delay in milliseconds
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
}

impl Default for TransportSettings {
	fn default() -> Self {
		Self {
			timeout_ms: default_timeout_ms(),
			max_retries: default_max_retries(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
		}
	}
}

impl TransportSettings {
	/// Get the timeout as a Duration
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	/// Get the initial backoff as a Duration
	pub fn initial_backoff(&self) -> Duration {
		Duration::from_millis(self.initial_backoff_ms)
	}

	/// Get the maximum backoff as a Duration
	pub fn max_backoff(&self) -> Duration {
		Duration::from_millis(self.max_backoff_ms)
	}
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_max_retries() -> u32 {
	3
}

fn default_initial_backoff_ms() -> u64 {
	5_000
}

fn default_max_backoff_ms() -> u64 {
	60_000
}

/// Send a request built by `build` until it succeeds, fails permanently or
/// the retry budget is spent. `build` is called once per attempt because
/// request bodies (multipart forms in particular) cannot be replayed.
pub(crate) async fn send_with_retry<F>(
	transport: &TransportSettings,
	build: F,
) -> Result<Value, GisError>
where
	F: Fn() -> reqwest::RequestBuilder,
{
	let mut attempts = 0;
	let mut backoff = transport.initial_backoff();

	loop {
		let err = match execute_once(build().timeout(transport.timeout())).await {
			Ok(body) => return Ok(body),
			Err(e) => e,
		};

		if !err.is_retryable() {
			return Err(err);
		}
		if attempts >= transport.max_retries {
			return Err(GisError::MaxRetriesExceeded {
				attempts: attempts + 1,
				last: err.to_string(),
			});
		}
		attempts += 1;

		warn!(
			"Feature service request failed (attempt {}/{}): {}, retrying after {:?}",
			attempts, transport.max_retries, err, backoff
		);
		sleep(backoff).await;
		backoff = next_backoff(backoff, transport.max_backoff());
	}
}

/// Exponential backoff with up to 25% jitter, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
	let doubled = (current * 2).min(max);
	let max_jitter = doubled.as_millis() as u64 / 4;
	let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter);
	doubled.saturating_add(Duration::from_millis(jitter_ms))
}

async fn execute_once(request: reqwest::RequestBuilder) -> Result<Value, GisError> {
	let response = request.send().await?;

	let status = response.status();
	if !status.is_success() {
		return Err(GisError::Status(status.as_u16()));
	}

	let bytes = response.bytes().await?;
	let body: Value =
		serde_json::from_slice(&bytes).map_err(|e| GisError::Decode(e.to_string()))?;

	// The REST API reports most failures as HTTP 200 with an `error` object.
	if let Some(error) = body.get("error") {
		let remote = serde_json::from_value(error.clone()).unwrap_or_default();
		return Err(GisError::Remote(remote));
	}

	Ok(body)
}
