//! Domain errors for the workbench.
//!
//! Every fallible operation below the Tauri command boundary returns
//! `WorkbenchError`. Commands convert to `String` for IPC and surface a
//! `notification` event with a human-readable fallback, so no error leaves an
//! operation unhandled.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// A collaborator read failed (orders, line items, with-barcodes fetch).
    #[error("{0}")]
    Fetch(String),

    /// A write to the admin dashboard failed.
    #[error("{0}")]
    Persist(String),

    /// The barcode renderer could not be initialized.
    #[error("Failed to load barcode renderer: {0}")]
    DependencyLoad(String),

    /// The renderer was loaded but a render call failed.
    #[error("{0}")]
    Render(String),

    /// Precondition failure: no order selected, unknown row, duplicate
    /// generation attempt, malformed input.
    #[error("{0}")]
    Validation(String),

    /// Local failure that is not the operator's fault (poisoned lock, bad
    /// local cache, filesystem).
    #[error("{0}")]
    Internal(String),
}

impl WorkbenchError {
    /// Notification title used when this error is surfaced as a toast.
    pub fn title(&self) -> &'static str {
        match self {
            WorkbenchError::Fetch(_) => "Load failed",
            WorkbenchError::Persist(_) => "Save failed",
            WorkbenchError::DependencyLoad(_) => "Renderer unavailable",
            WorkbenchError::Render(_) => "Barcode generation failed",
            WorkbenchError::Validation(_) => "Invalid request",
            WorkbenchError::Internal(_) => "Workbench error",
        }
    }

    /// Generic operator-facing message for when the detailed one is too raw
    /// to show (wire errors, SQL errors).
    pub fn fallback_message(&self) -> &'static str {
        match self {
            WorkbenchError::Fetch(_) => "Failed to load data from the admin dashboard",
            WorkbenchError::Persist(_) => "Failed to save changes to the admin dashboard",
            WorkbenchError::DependencyLoad(_) => "The barcode renderer could not be loaded",
            WorkbenchError::Render(_) => "The barcode image could not be generated",
            WorkbenchError::Validation(_) => "The request was rejected",
            WorkbenchError::Internal(_) => "An internal workbench error occurred",
        }
    }
}

impl From<WorkbenchError> for String {
    fn from(err: WorkbenchError) -> Self {
        err.to_string()
    }
}

/// Shorthand used by modules that lock shared state.
pub(crate) fn lock_poisoned<T>(_: T) -> WorkbenchError {
    WorkbenchError::Internal("workbench state lock poisoned".into())
}
