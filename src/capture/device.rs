//! Camera device abstraction.
//!
//! A [`CameraDevice`] hands out a [`VideoStream`] on a successful permission
//! request. The stream owns the hardware until [`VideoStream::stop_tracks`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use image::RgbImage;
use tracing::{debug, info};

use super::error::DeviceError;

/// Boxed future returned by [`CameraDevice::acquire`].
pub type DeviceFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Front camera.
    #[default]
    User,
    /// Rear camera.
    Environment,
}

/// Ideal video parameters passed with the permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    /// Ideal frame width in pixels.
    pub width: u32,
    /// Ideal frame height in pixels.
    pub height: u32,
    /// Preferred camera.
    pub facing: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: FacingMode::User,
        }
    }
}

impl VideoConstraints {
    /// Constraints with the given ideal size, user-facing.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            facing: FacingMode::User,
        }
    }
}

/// A live, exclusively owned video stream.
pub trait VideoStream: Send {
    /// Natural size of the current frame; `(0, 0)` until the stream produces one.
    fn dimensions(&self) -> (u32, u32);

    /// Copy the current frame.
    ///
    /// # Errors
    /// Returns an error if no frame can be read.
    fn grab_frame(&mut self) -> Result<RgbImage, DeviceError>;

    /// Stop every track and release the hardware.
    fn stop_tracks(&mut self);
}

/// Platform capability able to open a video stream.
pub trait CameraDevice: Send + Sync {
    /// Ask for access and open a stream.
    ///
    /// # Errors
    /// Returns an error if access is refused or no device is usable.
    fn acquire(
        &self,
        constraints: VideoConstraints,
    ) -> DeviceFuture<'_, Result<Box<dyn VideoStream>, DeviceError>>;
}

/// Camera that serves a still image file as its only frame.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    path: PathBuf,
}

impl StillImageCamera {
    /// Camera reading `path` on each acquisition.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Image file served by this camera.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CameraDevice for StillImageCamera {
    fn acquire(
        &self,
        constraints: VideoConstraints,
    ) -> DeviceFuture<'_, Result<Box<dyn VideoStream>, DeviceError>> {
        let path = self.path.clone();
        Box::pin(async move {
            let loaded = tokio::task::spawn_blocking(move || image::open(&path))
                .await
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?;

            let image = loaded.map_err(|err| match err {
                image::ImageError::IoError(io) => DeviceError::Unavailable(io.to_string()),
                other => DeviceError::Frame(other),
            })?;

            // Downscale to the requested size, like a camera honouring `ideal`.
            let image = if image.width() > constraints.width || image.height() > constraints.height
            {
                image.thumbnail(constraints.width, constraints.height)
            } else {
                image
            };
            let frame = image.to_rgb8();

            info!(
                width = frame.width(),
                height = frame.height(),
                "Still image camera acquired"
            );
            Ok(Box::new(StillImageStream::new(frame)) as Box<dyn VideoStream>)
        })
    }
}

/// Stream replaying a single frame.
#[derive(Debug)]
pub struct StillImageStream {
    frame: Option<RgbImage>,
}

impl StillImageStream {
    /// Stream serving `frame` until stopped.
    #[must_use]
    pub const fn new(frame: RgbImage) -> Self {
        Self { frame: Some(frame) }
    }

    /// Whether the tracks were stopped.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.frame.is_none()
    }
}

impl VideoStream for StillImageStream {
    fn dimensions(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map_or((0, 0), |frame| (frame.width(), frame.height()))
    }

    fn grab_frame(&mut self) -> Result<RgbImage, DeviceError> {
        self.frame
            .clone()
            .ok_or_else(|| DeviceError::Unavailable("stream stopped".to_string()))
    }

    fn stop_tracks(&mut self) {
        if self.frame.take().is_some() {
            debug!("Still image stream stopped");
        }
    }
}
