//! Edit reconciliation and the per-message sync run.

pub mod edits;
pub mod orchestrator;
pub mod reconcile;

pub use edits::{Edit, EditBatch, LayerEdits};
pub use orchestrator::SyncOrchestrator;
pub use reconcile::ReconciliationEngine;

/// Result of one sync run, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	/// Nothing to publish, or the run completed.
	NoContent,
	/// The feature service session could not be opened, or the inbound
	/// envelope could not be decoded.
	ServiceUnavailable,
	/// Required configuration is missing.
	BadGateway,
}

impl SyncOutcome {
	pub fn status(self) -> u16 {
		match self {
			SyncOutcome::NoContent => 204,
			SyncOutcome::ServiceUnavailable => 503,
			SyncOutcome::BadGateway => 502,
		}
	}

	pub fn reason(self) -> &'static str {
		match self {
			SyncOutcome::NoContent => "No Content",
			SyncOutcome::ServiceUnavailable => "Service Unavailable",
			SyncOutcome::BadGateway => "Bad Gateway",
		}
	}

	/// `(body, status)` pair.
	pub fn as_response(self) -> (&'static str, u16) {
		(self.reason(), self.status())
	}
}
