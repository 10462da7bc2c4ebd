//! Quota-gated camera session.
//!
//! Lifecycle: `Inactive -> RequestingPermission -> Active -> Inactive`. While
//! active the camera is released automatically once the inactivity countdown
//! reaches zero; a successful analysis restarts the countdown unless it used
//! up the day's quota.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use super::analysis::{AnalysisResult, EmotionAnalyzer};
use super::device::{CameraDevice, VideoConstraints, VideoStream};
use super::error::{
    CaptureError, CaptureResult, DEVICE_NOT_READY_MESSAGE, DeniedReason,
    PERMISSION_DENIED_MESSAGE, QUOTA_EXHAUSTED_MESSAGE,
};
use super::frame::encode_jpeg_data_url;
use super::quota::DailyUsage;
use crate::config::CaptureConfig;
use crate::telemetry::{AnalyticsEvent, TelemetrySink};

/// Camera lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    /// No camera held.
    #[default]
    Inactive,
    /// Waiting for the device permission.
    RequestingPermission,
    /// Camera held.
    Active,
}

/// Informational notices, distinct from errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureNotice {
    /// The camera was released after the inactivity timeout.
    AutoStopped,
}

/// Renderable view of the capture component.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureSnapshot {
    /// Camera lifecycle phase.
    pub phase: CapturePhase,
    /// Seconds before the camera is released; `None` when not counting down.
    pub remaining_seconds: Option<u32>,
    /// Whether an analysis request is outstanding.
    pub analyzing: bool,
    /// Last analysis of this activation.
    pub result: Option<AnalysisResult>,
    /// User-facing error of the last operation.
    pub error: Option<String>,
    /// Informational notice.
    pub notice: Option<CaptureNotice>,
    /// Analyses used today, as last read from the store.
    pub daily_usage: u32,
    /// Daily cap.
    pub max_daily_uses: u32,
}

impl CaptureSnapshot {
    /// Whether the camera is held.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.phase, CapturePhase::Active)
    }

    /// Whether today's analyses are used up.
    #[must_use]
    pub const fn quota_exhausted(&self) -> bool {
        self.daily_usage >= self.max_daily_uses
    }

    /// Analyses left today.
    #[must_use]
    pub const fn remaining_uses(&self) -> u32 {
        self.max_daily_uses.saturating_sub(self.daily_usage)
    }
}

struct CaptureState {
    phase: CapturePhase,
    stream: Option<Box<dyn VideoStream>>,
    remaining: Option<u32>,
    countdown: Option<JoinHandle<()>>,
    /// Bumped whenever a countdown is started or cancelled.
    generation: u64,
    /// Bumped on each start request; identifies the current activation.
    activation: u64,
    analyzing: bool,
    result: Option<AnalysisResult>,
    error: Option<String>,
    notice: Option<CaptureNotice>,
    daily_usage: u32,
    torn_down: bool,
}

impl CaptureState {
    const fn new() -> Self {
        Self {
            phase: CapturePhase::Inactive,
            stream: None,
            remaining: None,
            countdown: None,
            generation: 0,
            activation: 0,
            analyzing: false,
            result: None,
            error: None,
            notice: None,
            daily_usage: 0,
            torn_down: false,
        }
    }

    fn cancel_countdown(&mut self) {
        self.generation += 1;
        self.remaining = None;
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    /// Whether the camera from `activation` is still held.
    const fn is_live(&self, activation: u64) -> bool {
        !self.torn_down
            && matches!(self.phase, CapturePhase::Active)
            && self.activation == activation
    }

    /// Stop the tracks of the held stream, if any. Returns whether one was held.
    fn release_stream(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop_tracks();
                true
            }
            None => false,
        }
    }
}

struct CaptureShared {
    state: Mutex<CaptureState>,
    snapshots: watch::Sender<CaptureSnapshot>,
    usage: DailyUsage,
    timeout_seconds: u32,
}

impl CaptureShared {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, state: &CaptureState) -> CaptureSnapshot {
        CaptureSnapshot {
            phase: state.phase,
            remaining_seconds: state.remaining,
            analyzing: state.analyzing,
            result: state.result.clone(),
            error: state.error.clone(),
            notice: state.notice,
            daily_usage: state.daily_usage,
            max_daily_uses: self.usage.max_daily_uses(),
        }
    }

    fn publish(&self, state: &CaptureState) {
        if state.torn_down {
            return;
        }
        self.snapshots.send_replace(self.snapshot_of(state));
    }

    /// (Re)start the countdown at the full timeout.
    fn start_countdown(self: &Arc<Self>, state: &mut CaptureState) {
        state.cancel_countdown();
        state.remaining = Some(self.timeout_seconds);
        let generation = state.generation;

        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime, inactivity countdown only advances through tick()");
            return;
        };

        let shared = Arc::clone(self);
        state.countdown = Some(runtime.spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if !shared.tick(Some(generation)) {
                    break;
                }
            }
        }));
    }

    /// Restart the countdown if quota remains, otherwise leave it cleared.
    fn resume_countdown(self: &Arc<Self>, state: &mut CaptureState) {
        if state.daily_usage < self.usage.max_daily_uses() {
            self.start_countdown(state);
        } else {
            state.cancel_countdown();
        }
    }

    /// Advance the countdown by one second. `generation` pins the tick to one
    /// countdown; `None` targets whichever is running. Returns whether the
    /// countdown keeps going.
    fn tick(&self, generation: Option<u64>) -> bool {
        let mut state = self.lock();
        if state.torn_down || state.phase != CapturePhase::Active {
            return false;
        }
        if generation.is_some_and(|g| g != state.generation) {
            return false;
        }
        let Some(remaining) = state.remaining else {
            return false;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            state.remaining = Some(remaining);
            self.publish(&state);
            return true;
        }

        // May run on the countdown task itself: detach rather than abort.
        state.countdown = None;
        state.generation += 1;
        state.remaining = None;
        state.release_stream();
        state.phase = CapturePhase::Inactive;
        state.result = None;
        state.notice = Some(CaptureNotice::AutoStopped);
        info!("Camera auto-stopped after inactivity");
        self.publish(&state);
        false
    }
}

/// Marks one capture as in flight. Dropping it before [`Self::settle`]
/// means the caller abandoned the capture: the flag is cleared and the
/// countdown resumes for the activation the frame came from.
struct InFlightCapture<'a> {
    shared: &'a Arc<CaptureShared>,
    activation: u64,
    settled: bool,
}

impl<'a> InFlightCapture<'a> {
    const fn new(shared: &'a Arc<CaptureShared>, activation: u64) -> Self {
        Self {
            shared,
            activation,
            settled: false,
        }
    }

    /// Clear the analyzing flag and report whether the frame's activation is
    /// still the live one.
    fn settle(mut self, state: &mut CaptureState) -> bool {
        self.settled = true;
        state.analyzing = false;
        state.is_live(self.activation)
    }
}

impl Drop for InFlightCapture<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.shared.lock();
        state.analyzing = false;
        if state.is_live(self.activation) {
            self.shared.resume_countdown(&mut state);
        }
        debug!("Capture abandoned before the analysis returned");
        self.shared.publish(&state);
    }
}

/// Camera session gated by a persisted daily quota and an inactivity timeout.
pub struct RateLimitedCapture {
    camera: Arc<dyn CameraDevice>,
    analyzer: Arc<dyn EmotionAnalyzer>,
    telemetry: Arc<dyn TelemetrySink>,
    config: CaptureConfig,
    shared: Arc<CaptureShared>,
}

impl RateLimitedCapture {
    /// Create an inactive session.
    ///
    /// The initial snapshot reports zero usage until the first quota read;
    /// see [`Self::refresh_usage`].
    #[must_use]
    pub fn new(
        camera: Arc<dyn CameraDevice>,
        analyzer: Arc<dyn EmotionAnalyzer>,
        telemetry: Arc<dyn TelemetrySink>,
        usage: DailyUsage,
        config: CaptureConfig,
    ) -> Self {
        let state = CaptureState::new();
        let initial = CaptureSnapshot {
            max_daily_uses: usage.max_daily_uses(),
            ..CaptureSnapshot::default()
        };
        let (snapshots, _) = watch::channel(initial);
        Self {
            camera,
            analyzer,
            telemetry,
            shared: Arc::new(CaptureShared {
                state: Mutex::new(state),
                snapshots,
                usage,
                timeout_seconds: config.timeout_seconds(),
            }),
            config,
        }
    }

    /// Follow every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> CaptureSnapshot {
        let state = self.shared.lock();
        self.shared.snapshot_of(&state)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CapturePhase {
        self.shared.lock().phase
    }

    /// Whether the camera is held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase() == CapturePhase::Active
    }

    /// Seconds left on the inactivity countdown.
    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.shared.lock().remaining
    }

    /// Re-read today's usage from the store and publish it.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn refresh_usage(&self) -> CaptureResult<u32> {
        let mut state = self.shared.lock();
        let usage = self.shared.usage.get_daily_usage()?;
        state.daily_usage = usage;
        self.shared.publish(&state);
        Ok(usage)
    }

    /// Ask for the camera and start the inactivity countdown.
    ///
    /// Already active is a success. The device is never prompted when the
    /// quota is exhausted.
    ///
    /// # Errors
    /// Returns the [`DeniedReason`] preventing activation.
    pub async fn request_start(&self) -> Result<(), DeniedReason> {
        let activation = {
            let mut state = self.shared.lock();
            if state.torn_down {
                return Err(DeniedReason::Cancelled);
            }
            match state.phase {
                CapturePhase::Active => return Ok(()),
                CapturePhase::RequestingPermission => return Err(DeniedReason::InProgress),
                CapturePhase::Inactive => {}
            }

            let usage = self.shared.usage.get_daily_usage()?;
            state.daily_usage = usage;
            if usage >= self.shared.usage.max_daily_uses() {
                state.error = Some(QUOTA_EXHAUSTED_MESSAGE.to_string());
                self.shared.publish(&state);
                info!(usage, "Camera start refused, daily quota exhausted");
                return Err(DeniedReason::QuotaExhausted);
            }

            state.phase = CapturePhase::RequestingPermission;
            state.activation += 1;
            state.error = None;
            state.notice = None;
            self.shared.publish(&state);
            state.activation
        };

        let constraints = VideoConstraints::new(self.config.video_width, self.config.video_height);
        let acquired = self.camera.acquire(constraints).await;

        let mut state = self.shared.lock();
        if state.torn_down
            || state.phase != CapturePhase::RequestingPermission
            || state.activation != activation
        {
            if let Ok(mut stream) = acquired {
                stream.stop_tracks();
            }
            debug!("Camera start cancelled while waiting for permission");
            return Err(DeniedReason::Cancelled);
        }

        match acquired {
            Ok(stream) => {
                state.stream = Some(stream);
                state.phase = CapturePhase::Active;
                self.shared.start_countdown(&mut state);
                info!(
                    timeout_seconds = self.shared.timeout_seconds,
                    "Camera acquired"
                );
                self.shared.publish(&state);
                Ok(())
            }
            Err(err) => {
                state.phase = CapturePhase::Inactive;
                state.error = Some(PERMISSION_DENIED_MESSAGE.to_string());
                warn!(%err, "Camera permission denied");
                self.shared.publish(&state);
                Err(DeniedReason::PermissionDenied(err.to_string()))
            }
        }
    }

    /// Advance the inactivity countdown by one second, releasing the camera
    /// when it reaches zero. The running countdown task calls this once per
    /// second; calling it by hand moves the same countdown.
    pub fn tick(&self) {
        self.shared.tick(None);
    }

    /// Release the camera and clear the countdown, result and error.
    /// Returns whether anything was stopped; a no-op when already inactive.
    #[must_use]
    pub fn stop(&self) -> bool {
        let mut state = self.shared.lock();
        match state.phase {
            CapturePhase::Inactive => false,
            CapturePhase::RequestingPermission => {
                state.phase = CapturePhase::Inactive;
                state.error = None;
                state.notice = None;
                self.shared.publish(&state);
                info!("Camera request abandoned");
                true
            }
            CapturePhase::Active => {
                state.cancel_countdown();
                state.release_stream();
                state.phase = CapturePhase::Inactive;
                state.result = None;
                state.error = None;
                state.notice = None;
                info!("Camera released");
                self.shared.publish(&state);
                true
            }
        }
    }

    /// Grab the current frame and have it analysed.
    ///
    /// The countdown pauses for the duration of the request. On success the
    /// day's usage grows by one and the countdown restarts unless the quota
    /// is now used up; on failure neither usage nor result change.
    ///
    /// # Errors
    /// Returns [`CaptureError::NotActive`], [`CaptureError::Busy`],
    /// [`CaptureError::QuotaExhausted`] or [`CaptureError::DeviceNotReady`]
    /// without contacting the analysis service, and the device, encoding,
    /// analysis or quota failure otherwise.
    pub async fn capture(&self) -> CaptureResult<AnalysisResult> {
        let (frame, activation) = {
            let mut state = self.shared.lock();
            if state.torn_down || state.phase != CapturePhase::Active {
                return Err(CaptureError::NotActive);
            }
            if state.analyzing {
                return Err(CaptureError::Busy);
            }

            let usage = self.shared.usage.get_daily_usage()?;
            state.daily_usage = usage;
            if usage >= self.shared.usage.max_daily_uses() {
                state.cancel_countdown();
                state.error = Some(QUOTA_EXHAUSTED_MESSAGE.to_string());
                self.shared.publish(&state);
                return Err(CaptureError::QuotaExhausted);
            }

            let Some(stream) = state.stream.as_mut() else {
                return Err(CaptureError::NotActive);
            };
            let (width, height) = stream.dimensions();
            if width == 0 || height == 0 {
                state.error = Some(DEVICE_NOT_READY_MESSAGE.to_string());
                self.shared.publish(&state);
                return Err(CaptureError::DeviceNotReady);
            }
            let frame = match stream.grab_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, "Could not read camera frame");
                    state.error = Some(err.to_string());
                    self.shared.publish(&state);
                    return Err(err.into());
                }
            };

            state.cancel_countdown();
            state.analyzing = true;
            state.result = None;
            state.error = None;
            state.notice = None;
            self.shared.publish(&state);
            debug!(width, height, "Frame captured");
            (frame, state.activation)
        };
        let in_flight = InFlightCapture::new(&self.shared, activation);

        let outcome = match encode_jpeg_data_url(&frame, self.config.jpeg_quality) {
            Ok(payload) => self.analyzer.analyze(payload).await.map_err(CaptureError::from),
            Err(err) => Err(CaptureError::Frame(err)),
        };

        let mut state = self.shared.lock();
        let still_active = in_flight.settle(&mut state);

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "Emotion analysis failed");
                if still_active {
                    state.error = Some(err.user_message());
                    self.shared.resume_countdown(&mut state);
                }
                self.shared.publish(&state);
                return Err(err);
            }
        };

        let incremented = self.shared.usage.increment_daily_usage();
        if let Ok(count) = incremented {
            state.daily_usage = count;
        }
        if still_active {
            state.result = Some(result.clone());
            self.shared.resume_countdown(&mut state);
        }

        match incremented {
            Ok(count) => {
                info!(
                    usage = count,
                    max = self.shared.usage.max_daily_uses(),
                    dominant = result.dominant().map(|e| e.kind.as_str()),
                    "Emotion analysis complete"
                );
                self.shared.publish(&state);
                drop(state);
                self.telemetry
                    .emit(AnalyticsEvent::new(self.config.analytics_event.clone()));
                Ok(result)
            }
            Err(err) => {
                warn!(%err, "Could not record daily usage");
                if still_active {
                    state.error = Some(err.to_string());
                }
                self.shared.publish(&state);
                Err(err.into())
            }
        }
    }

    /// Tear the component down: release the camera, cancel the countdown and
    /// stop publishing. Idempotent.
    pub fn unmount(&self) {
        let mut state = self.shared.lock();
        if state.torn_down {
            return;
        }
        state.cancel_countdown();
        if state.release_stream() {
            info!("Camera released on unmount");
        }
        state.phase = CapturePhase::Inactive;
        state.torn_down = true;
    }

    /// Whether [`Self::unmount`] has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.shared.lock().torn_down
    }
}

impl Drop for RateLimitedCapture {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};
    use tokio::sync::Notify;
    use tokio::time::sleep;

    use crate::capture::analysis::{AnalysisFuture, EmotionScore};
    use crate::capture::device::DeviceFuture;
    use crate::capture::error::{AUTO_STOPPED_MESSAGE, AnalysisError, DeviceError};
    use crate::capture::quota::{DailyQuota, FixedClock, MemoryQuotaStore, QuotaStore, quota_day};
    use crate::config::DEFAULT_QUOTA_KEY;
    use crate::telemetry::testing::RecordingTelemetry;

    struct FakeStream {
        dimensions: (u32, u32),
        stop_calls: Arc<AtomicUsize>,
    }

    impl VideoStream for FakeStream {
        fn dimensions(&self) -> (u32, u32) {
            self.dimensions
        }

        fn grab_frame(&mut self) -> Result<RgbImage, DeviceError> {
            Ok(RgbImage::from_pixel(
                self.dimensions.0,
                self.dimensions.1,
                Rgb([90, 120, 150]),
            ))
        }

        fn stop_tracks(&mut self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeCamera {
        deny: AtomicBool,
        dimensions: (u32, u32),
        gate: Option<Arc<Notify>>,
        acquisitions: AtomicUsize,
        stop_calls: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        fn new() -> Arc<Self> {
            Self::build((32, 24), None)
        }

        fn build(dimensions: (u32, u32), gate: Option<Arc<Notify>>) -> Arc<Self> {
            Arc::new(Self {
                deny: AtomicBool::new(false),
                dimensions,
                gate,
                acquisitions: AtomicUsize::new(0),
                stop_calls: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn acquisitions(&self) -> usize {
            self.acquisitions.load(Ordering::SeqCst)
        }

        fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    impl CameraDevice for FakeCamera {
        fn acquire(
            &self,
            _constraints: VideoConstraints,
        ) -> DeviceFuture<'_, Result<Box<dyn VideoStream>, DeviceError>> {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                if self.deny.load(Ordering::SeqCst) {
                    return Err(DeviceError::PermissionDenied("NotAllowedError".to_string()));
                }
                Ok(Box::new(FakeStream {
                    dimensions: self.dimensions,
                    stop_calls: Arc::clone(&self.stop_calls),
                }) as Box<dyn VideoStream>)
            })
        }
    }

    struct FakeAnalyzer {
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        fn new() -> Arc<Self> {
            Self::build(None)
        }

        fn build(gate: Option<Arc<Notify>>) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                gate,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EmotionAnalyzer for FakeAnalyzer {
        fn analyze(&self, image_data_url: String) -> AnalysisFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                assert!(image_data_url.starts_with("data:image/jpeg;base64,"));
                if self.fail.load(Ordering::SeqCst) {
                    return Err(AnalysisError::Rejected {
                        status: 422,
                        message: "Aucun visage détecté dans l'image".to_string(),
                    });
                }
                let happy = EmotionScore {
                    kind: "HAPPY".to_string(),
                    emoji: "😄".to_string(),
                    confidence: 91.0,
                };
                Ok(AnalysisResult {
                    dominant_emotion: Some(happy.clone()),
                    emotions: vec![happy],
                    faces_detected: 1,
                    ..AnalysisResult::default()
                })
            })
        }
    }

    struct Harness {
        capture: RateLimitedCapture,
        camera: Arc<FakeCamera>,
        analyzer: Arc<FakeAnalyzer>,
        telemetry: Arc<RecordingTelemetry>,
        store: Arc<MemoryQuotaStore>,
        clock: Arc<FixedClock>,
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap_or_default()
    }

    fn harness_with(camera: Arc<FakeCamera>, analyzer: Arc<FakeAnalyzer>) -> Harness {
        let store = Arc::new(MemoryQuotaStore::new());
        let clock = Arc::new(FixedClock::new(today()));
        let telemetry = Arc::new(RecordingTelemetry::default());
        let config = CaptureConfig::default();
        let usage = DailyUsage::new(
            store.clone(),
            clock.clone(),
            config.quota_key.clone(),
            config.max_daily_uses,
        );
        let capture = RateLimitedCapture::new(
            camera.clone(),
            analyzer.clone(),
            telemetry.clone(),
            usage,
            config,
        );
        Harness {
            capture,
            camera,
            analyzer,
            telemetry,
            store,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeCamera::new(), FakeAnalyzer::new())
    }

    fn preload_usage(store: &MemoryQuotaStore, count: u32) {
        let record = DailyQuota {
            count,
            date: quota_day(today()),
        };
        assert!(store.write(DEFAULT_QUOTA_KEY, &record).is_ok());
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_acquires_camera_and_counts_down() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());
        assert!(h.capture.is_active());
        assert_eq!(h.capture.remaining_seconds(), Some(30));

        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(h.capture.remaining_seconds(), Some(27));

        // Starting again while active changes nothing.
        assert!(h.capture.request_start().await.is_ok());
        assert_eq!(h.camera.acquisitions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_auto_stops() {
        let h = harness();
        let mut snapshots = h.capture.subscribe();
        assert!(h.capture.request_start().await.is_ok());

        sleep(Duration::from_secs(31)).await;
        settle().await;

        let snapshot = h.capture.snapshot();
        assert_eq!(snapshot.phase, CapturePhase::Inactive);
        assert_eq!(snapshot.remaining_seconds, None);
        assert_eq!(snapshot.notice, Some(CaptureNotice::AutoStopped));
        assert_eq!(h.camera.stop_calls(), 1);
        assert!(snapshots.has_changed().unwrap_or(false));
        assert_eq!(
            snapshots.borrow_and_update().notice,
            Some(CaptureNotice::AutoStopped)
        );
        assert!(!AUTO_STOPPED_MESSAGE.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_resets_countdown() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());

        sleep(Duration::from_millis(20_500)).await;
        assert_eq!(h.capture.remaining_seconds(), Some(10));

        let result = h.capture.capture().await;
        assert!(result.is_ok());
        assert_eq!(h.capture.remaining_seconds(), Some(30));
        assert_eq!(h.analyzer.calls(), 1);

        let snapshot = h.capture.snapshot();
        assert_eq!(snapshot.daily_usage, 1);
        assert_eq!(
            snapshot.result.as_ref().and_then(|r| r.dominant()).map(|e| e.kind.as_str()),
            Some("HAPPY")
        );

        // The old countdown is gone: 29 more seconds keep the camera on.
        sleep(Duration::from_secs(29)).await;
        settle().await;
        assert!(h.capture.is_active());

        sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(!h.capture.is_active());
        assert_eq!(h.camera.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_capture_leaves_camera_on_without_countdown() {
        let h = harness();
        preload_usage(&h.store, 4);
        assert!(h.capture.request_start().await.is_ok());

        assert!(h.capture.capture().await.is_ok());
        let snapshot = h.capture.snapshot();
        assert!(snapshot.is_active());
        assert!(snapshot.quota_exhausted());
        assert_eq!(snapshot.remaining_seconds, None);

        sleep(Duration::from_secs(120)).await;
        settle().await;
        assert!(h.capture.is_active());
        assert_eq!(h.camera.stop_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_blocks_start_and_capture() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());
        for _ in 0..5 {
            assert!(h.capture.capture().await.is_ok());
        }
        assert_eq!(h.analyzer.calls(), 5);
        assert_eq!(h.telemetry.events().len(), 5);
        assert_eq!(h.telemetry.events()[0].event_type, "ml_emotion_test");

        let again = h.capture.capture().await;
        assert!(matches!(again, Err(CaptureError::QuotaExhausted)));
        assert_eq!(
            again.err().map(|e| e.user_message()).as_deref(),
            Some(QUOTA_EXHAUSTED_MESSAGE)
        );

        assert!(h.capture.stop());
        let start = h.capture.request_start().await;
        assert!(matches!(start, Err(DeniedReason::QuotaExhausted)));

        assert_eq!(h.analyzer.calls(), 5);
        assert_eq!(h.camera.acquisitions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_resets_next_day() {
        let h = harness();
        preload_usage(&h.store, 5);
        assert!(matches!(
            h.capture.request_start().await,
            Err(DeniedReason::QuotaExhausted)
        ));

        h.clock.set(today().succ_opt().unwrap_or_default());
        assert!(h.capture.request_start().await.is_ok());
        assert_eq!(h.capture.snapshot().daily_usage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_checks_quota_at_call_time() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());

        // Another client used the remaining uses meanwhile.
        preload_usage(&h.store, 5);
        let result = h.capture.capture().await;
        assert!(matches!(result, Err(CaptureError::QuotaExhausted)));
        assert_eq!(h.analyzer.calls(), 0);
        assert!(h.capture.is_active());
        assert_eq!(h.capture.remaining_seconds(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied() {
        let camera = FakeCamera::new();
        camera.deny.store(true, Ordering::SeqCst);
        let h = harness_with(camera, FakeAnalyzer::new());

        let result = h.capture.request_start().await;
        assert!(matches!(result, Err(DeniedReason::PermissionDenied(_))));

        let snapshot = h.capture.snapshot();
        assert_eq!(snapshot.phase, CapturePhase::Inactive);
        assert_eq!(snapshot.remaining_seconds, None);
        assert_eq!(snapshot.error.as_deref(), Some(PERMISSION_DENIED_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_before_frames_is_not_ready() {
        let h = harness_with(FakeCamera::build((0, 0), None), FakeAnalyzer::new());
        assert!(h.capture.request_start().await.is_ok());

        let result = h.capture.capture().await;
        assert!(matches!(result, Err(CaptureError::DeviceNotReady)));
        assert_eq!(h.analyzer.calls(), 0);
        // The countdown keeps running.
        assert_eq!(h.capture.remaining_seconds(), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_analysis_keeps_quota() {
        let h = harness();
        h.analyzer.fail.store(true, Ordering::SeqCst);
        assert!(h.capture.request_start().await.is_ok());

        let result = h.capture.capture().await;
        assert!(matches!(result, Err(CaptureError::Analysis(_))));

        let snapshot = h.capture.snapshot();
        assert_eq!(snapshot.daily_usage, 0);
        assert!(snapshot.result.is_none());
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Aucun visage détecté dans l'image")
        );
        assert_eq!(snapshot.remaining_seconds, Some(30));
        assert!(h.telemetry.events().is_empty());
        assert!(h.store.read(DEFAULT_QUOTA_KEY).ok().flatten().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let h = harness();
        assert!(!h.capture.stop());
        assert_eq!(h.camera.stop_calls(), 0);

        assert!(h.capture.request_start().await.is_ok());
        assert!(h.capture.stop());
        assert!(!h.capture.stop());
        assert!(!h.capture.stop());
        assert_eq!(h.camera.stop_calls(), 1);

        let snapshot = h.capture.snapshot();
        assert_eq!(snapshot.phase, CapturePhase::Inactive);
        assert_eq!(snapshot.remaining_seconds, None);
        assert!(snapshot.error.is_none());

        // A stale countdown cannot fire after stop.
        sleep(Duration::from_secs(40)).await;
        settle().await;
        assert_eq!(h.camera.stop_calls(), 1);
        assert!(h.capture.snapshot().notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_tick() {
        let h = harness();
        h.capture.tick();
        assert!(!h.capture.is_active());

        assert!(h.capture.request_start().await.is_ok());
        h.capture.tick();
        h.capture.tick();
        assert_eq!(h.capture.remaining_seconds(), Some(28));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_capture_is_busy() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCamera::new(), FakeAnalyzer::build(Some(gate.clone())));
        let capture = Arc::new(h.capture);
        assert!(capture.request_start().await.is_ok());

        let first = {
            let capture = Arc::clone(&capture);
            tokio::spawn(async move { capture.capture().await })
        };
        settle().await;
        assert_eq!(h.analyzer.calls(), 1);
        assert!(capture.snapshot().analyzing);
        assert_eq!(capture.remaining_seconds(), None);

        assert!(matches!(capture.capture().await, Err(CaptureError::Busy)));

        gate.notify_one();
        let first = first.await;
        assert!(matches!(first, Ok(Ok(_))));
        assert_eq!(h.analyzer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_permission_request() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCamera::build((32, 24), Some(gate.clone())), FakeAnalyzer::new());
        let capture = Arc::new(h.capture);

        let pending = {
            let capture = Arc::clone(&capture);
            tokio::spawn(async move { capture.request_start().await })
        };
        settle().await;
        assert_eq!(capture.phase(), CapturePhase::RequestingPermission);
        assert!(matches!(
            capture.request_start().await,
            Err(DeniedReason::InProgress)
        ));

        // Left over from an earlier activation.
        {
            let mut state = capture.shared.lock();
            state.error = Some(PERMISSION_DENIED_MESSAGE.to_string());
            state.notice = Some(CaptureNotice::AutoStopped);
        }

        assert!(capture.stop());
        let snapshot = capture.snapshot();
        assert!(snapshot.error.is_none());
        assert!(snapshot.notice.is_none());

        gate.notify_one();
        let outcome = pending.await;
        assert!(matches!(outcome, Ok(Err(DeniedReason::Cancelled))));

        // The late stream was released and nothing is held.
        assert_eq!(h.camera.stop_calls(), 1);
        assert_eq!(capture.phase(), CapturePhase::Inactive);
        assert_eq!(capture.remaining_seconds(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_releases_camera_once() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());

        h.capture.unmount();
        h.capture.unmount();
        assert!(h.capture.is_torn_down());
        assert_eq!(h.camera.stop_calls(), 1);
        assert!(matches!(h.capture.capture().await, Err(CaptureError::NotActive)));
        assert!(matches!(
            h.capture.request_start().await,
            Err(DeniedReason::Cancelled)
        ));

        let stop_calls = Arc::clone(&h.camera.stop_calls);
        drop(h);
        assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_camera() {
        let h = harness();
        assert!(h.capture.request_start().await.is_ok());
        let stop_calls = Arc::clone(&h.camera.stop_calls);
        drop(h);
        assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_analysis_discards_result() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCamera::new(), FakeAnalyzer::build(Some(gate.clone())));
        let capture = Arc::new(h.capture);
        assert!(capture.request_start().await.is_ok());

        let pending = {
            let capture = Arc::clone(&capture);
            tokio::spawn(async move { capture.capture().await })
        };
        settle().await;
        assert!(capture.stop());
        gate.notify_one();

        let outcome = pending.await;
        assert!(matches!(outcome, Ok(Ok(_))));

        // Usage is still counted, but the inactive session shows nothing.
        let snapshot = capture.snapshot();
        assert_eq!(snapshot.daily_usage, 1);
        assert!(snapshot.result.is_none());
        assert_eq!(snapshot.remaining_seconds, None);
        assert_eq!(snapshot.phase, CapturePhase::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_capture_resumes_countdown() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCamera::new(), FakeAnalyzer::build(Some(gate)));
        assert!(h.capture.request_start().await.is_ok());

        let abandoned = tokio::time::timeout(Duration::from_secs(5), h.capture.capture()).await;
        assert!(abandoned.is_err());
        assert_eq!(h.analyzer.calls(), 1);

        let snapshot = h.capture.snapshot();
        assert!(!snapshot.analyzing);
        assert_eq!(snapshot.phase, CapturePhase::Active);
        assert_eq!(snapshot.remaining_seconds, Some(30));
        assert_eq!(snapshot.daily_usage, 0);
        assert!(h.telemetry.events().is_empty());

        // The camera still goes dark after the timeout.
        sleep(Duration::from_secs(31)).await;
        settle().await;
        assert!(!h.capture.is_active());
        assert_eq!(h.camera.stop_calls(), 1);
        assert_eq!(h.capture.snapshot().notice, Some(CaptureNotice::AutoStopped));

        // A new activation is not blocked by the abandoned request.
        assert!(h.capture.request_start().await.is_ok());
        let next = tokio::time::timeout(Duration::from_secs(5), h.capture.capture()).await;
        assert!(next.is_err());
        assert_eq!(h.analyzer.calls(), 2);
        assert!(!h.capture.snapshot().analyzing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_capture_after_stop_leaves_camera_off() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCamera::new(), FakeAnalyzer::build(Some(gate)));
        let capture = Arc::new(h.capture);
        assert!(capture.request_start().await.is_ok());

        let pending = {
            let capture = Arc::clone(&capture);
            tokio::spawn(async move { capture.capture().await })
        };
        settle().await;
        assert!(capture.stop());
        pending.abort();
        assert!(pending.await.is_err());

        let snapshot = capture.snapshot();
        assert!(!snapshot.analyzing);
        assert_eq!(snapshot.phase, CapturePhase::Inactive);
        assert_eq!(snapshot.remaining_seconds, None);
        assert_eq!(h.camera.stop_calls(), 1);
    }
}
