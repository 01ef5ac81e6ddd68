//! Attachment download and upload after a feature's remote id is known.

pub mod coordinator;
pub mod source;

pub use coordinator::{AttachmentBackfill, AttachmentCoordinator};
pub use source::{Attachment, AttachmentSource, HttpAttachmentSource};
