//! Webcam emotion detector.
//!
//! Provides:
//! - Camera acquisition and release behind [`CameraDevice`]
//! - A persisted daily quota ([`DailyUsage`] over a [`QuotaStore`])
//! - Frame encoding and remote analysis
//! - The [`RateLimitedCapture`] state machine with its inactivity countdown

pub mod analysis;
pub mod device;
pub mod error;
pub mod frame;
pub mod quota;
pub mod session;

pub use analysis::{
    AgeRange, AnalysisFuture, AnalysisResult, EmotionAnalyzer, EmotionScore, FaceInfo,
    HttpEmotionAnalyzer,
};
pub use device::{
    CameraDevice, DeviceFuture, FacingMode, StillImageCamera, StillImageStream, VideoConstraints,
    VideoStream,
};
pub use error::{
    AnalysisError, CaptureError, CaptureResult, DeniedReason, DeviceError, QuotaError,
};
pub use frame::{encode_jpeg, encode_jpeg_data_url};
pub use quota::{
    Clock, DailyQuota, DailyUsage, FixedClock, JsonFileQuotaStore, LocalClock, MemoryQuotaStore,
    QuotaStore,
};
pub use session::{CaptureNotice, CapturePhase, CaptureSnapshot, RateLimitedCapture};
