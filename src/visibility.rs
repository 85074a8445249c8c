//! "Hide from other applications" collaborator.
//!
//! While a bridge owns a device, other programs should only see the virtual
//! pad. The actual OS mechanism lives outside this crate; the registry only
//! calls [`VisibilityControl::set_hidden`] and logs failures.

use crate::error::VisibilityError;
use tracing::debug;

pub trait VisibilityControl: Send + Sync {
    fn set_hidden(&self, instance_id: &str, hidden: bool) -> Result<(), VisibilityError>;
}

/// Logs requests and does nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoVisibility;

impl VisibilityControl for NoVisibility {
    fn set_hidden(&self, instance_id: &str, hidden: bool) -> Result<(), VisibilityError> {
        debug!(instance_id, hidden, "visibility change skipped (no collaborator)");
        Ok(())
    }
}
