//! Error types for the emotion capture component.

use thiserror::Error;

/// User-facing text for an exhausted daily quota.
pub const QUOTA_EXHAUSTED_MESSAGE: &str =
    "Limite quotidienne atteinte. Revenez demain pour une nouvelle analyse !";
/// User-facing text for a refused camera.
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Permission caméra refusée. Autorisez l'accès dans votre navigateur.";
/// User-facing text when the video stream has no frame yet.
pub const DEVICE_NOT_READY_MESSAGE: &str =
    "La caméra n'est pas encore prête, réessayez dans une seconde.";
/// User-facing text after the inactivity timeout.
pub const AUTO_STOPPED_MESSAGE: &str =
    "Caméra arrêtée automatiquement après une période d'inactivité.";
/// Fallback when the analysis service gives no usable message.
pub const ANALYSIS_FALLBACK_MESSAGE: &str = "Erreur serveur";

/// Failures of the persisted quota store.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Reading or writing the backing file failed.
    #[error("quota storage io error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file is not valid JSON.
    #[error("quota storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the camera device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Access refused by the platform or the user.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// No usable device.
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    /// Frame could not be read or decoded.
    #[error("camera frame error: {0}")]
    Frame(#[from] image::ImageError),
}

/// Failures of the remote analysis call.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The service answered with a non-success status.
    #[error("analysis rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// The service's `detail`, or the generic fallback.
        message: String,
    },
    /// Network failure or unreadable response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AnalysisError {
    /// Text to show to the visitor.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::Http(_) => ANALYSIS_FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// Reasons `request_start` refuses to activate the camera.
#[derive(Debug, Error)]
pub enum DeniedReason {
    /// Today's analyses are used up.
    #[error("daily quota exhausted")]
    QuotaExhausted,
    /// The device refused access.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// A permission request is already pending.
    #[error("camera permission request already in progress")]
    InProgress,
    /// `stop` or teardown happened while permission was pending.
    #[error("camera start cancelled")]
    Cancelled,
    /// The quota record could not be read.
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// Failures of `capture`.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Today's analyses are used up.
    #[error("daily quota exhausted")]
    QuotaExhausted,
    /// The camera is not active.
    #[error("camera is not active")]
    NotActive,
    /// The video stream reports no dimensions yet.
    #[error("camera is not producing frames yet")]
    DeviceNotReady,
    /// An analysis is already running.
    #[error("an analysis is already in progress")]
    Busy,
    /// Reading the frame failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// Encoding the frame failed.
    #[error("frame encoding failed: {0}")]
    Frame(#[from] image::ImageError),
    /// The remote analysis failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    /// The quota record could not be read or written.
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl CaptureError {
    /// Text to show to the visitor.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExhausted => QUOTA_EXHAUSTED_MESSAGE.to_string(),
            Self::DeviceNotReady => DEVICE_NOT_READY_MESSAGE.to_string(),
            Self::Analysis(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

/// Convenience result alias for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
