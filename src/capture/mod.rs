//! Video source.
//!
//! A single-buffer capture stream. `acquire` queues the one mapped buffer,
//! waits (bounded by the configured timeout) for the device to fill it, and
//! hands back a view onto that memory. The view is only valid until the next
//! `acquire`, which re-queues the buffer.
//!
//! A wait that ends without a frame (timeout or signal) leaves the buffer
//! queued with the driver. `BufferCycle` records that, and the next `acquire`
//! stops the stream first so the buffer is handed back before it is queued
//! again.
//!
//! Backends:
//! - V4L2 devices (feature: ingest-v4l2)
//! - `stub://` synthetic source producing a deterministic test pattern

mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;
use std::io::ErrorKind;

use crate::config::CameraSettings;

pub use synthetic::SyntheticSource;

/// Outcome of one acquire call.
#[derive(Debug)]
pub enum Acquired<'a> {
    /// Bytes of the captured RGB24 frame, valid until the next acquire.
    Frame(&'a [u8]),
    /// No frame arrived within the capture timeout.
    TimedOut,
    /// A signal interrupted the wait.
    Interrupted,
}

/// Statistics for a video source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub timeouts: u64,
    /// Stream restarts after waits that returned without a frame.
    pub restarts: u64,
    pub device: String,
}

/// Ownership of the single capture buffer across acquires.
#[derive(Debug, Default)]
pub(crate) struct BufferCycle {
    stranded: bool,
    restarts: u64,
}

impl BufferCycle {
    /// Map a failed wait onto an acquire outcome. Timeouts and interrupted
    /// waits leave the buffer with the driver and are recoverable; any other
    /// error kind returns `None`.
    pub(crate) fn wait_failed(&mut self, kind: ErrorKind) -> Option<Acquired<'static>> {
        let outcome = match kind {
            ErrorKind::TimedOut => Acquired::TimedOut,
            ErrorKind::Interrupted => Acquired::Interrupted,
            _ => return None,
        };
        self.stranded = true;
        Some(outcome)
    }

    /// True once after a failed wait. The caller must stop the stream before
    /// queueing the buffer again.
    pub(crate) fn take_restart(&mut self) -> bool {
        if std::mem::take(&mut self.stranded) {
            self.restarts += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn restarts(&self) -> u64 {
        self.restarts
    }
}

pub struct VideoSource {
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(v4l2::DeviceSource),
}

impl VideoSource {
    /// Open the device, negotiate RGB24 at the configured size, map one
    /// buffer and start streaming.
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        let backend = if settings.device.starts_with("stub://") {
            VideoBackend::Synthetic(SyntheticSource::new(settings)?)
        } else {
            Self::open_device(settings)?
        };
        Ok(Self { backend })
    }

    #[cfg(feature = "ingest-v4l2")]
    fn open_device(settings: &CameraSettings) -> Result<VideoBackend> {
        Ok(VideoBackend::Device(v4l2::DeviceSource::open(settings)?))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn open_device(settings: &CameraSettings) -> Result<VideoBackend> {
        Err(anyhow::anyhow!(
            "camera {} requires the ingest-v4l2 feature (or a stub:// path)",
            settings.device
        ))
    }

    /// Capture the next frame.
    pub fn acquire(&mut self) -> Result<Acquired<'_>> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.acquire(),
            #[cfg(feature = "ingest-v4l2")]
            VideoBackend::Device(source) => source.acquire(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            VideoBackend::Device(source) => source.stats(),
        }
    }
}
