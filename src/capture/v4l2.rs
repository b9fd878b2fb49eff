//! V4L2 capture through libv4l.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{Acquired, BufferCycle, CaptureStats};
use crate::config::CameraSettings;

const RGB24: &[u8; 4] = b"RGB3";
/// One mapped buffer: each acquire re-queues it and waits for it to be filled.
const BUFFER_COUNT: u32 = 1;

pub(super) struct DeviceSource {
    device: String,
    state: DeviceState,
    frame_count: u64,
    timeouts: u64,
    cycle: BufferCycle,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSource {
    pub(super) fn open(settings: &CameraSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&settings.device)
            .with_context(|| format!("failed to open camera {}", settings.device))?;

        let mut requested =
            v4l::Format::new(settings.width, settings.height, v4l::FourCC::new(RGB24));
        requested.field_order = v4l::format::FieldOrder::Progressive;
        let active = device
            .set_format(&requested)
            .with_context(|| format!("VIDIOC_S_FMT on {}", settings.device))?;
        if active.width != settings.width
            || active.height != settings.height
            || active.fourcc != requested.fourcc
        {
            return Err(anyhow!(
                "camera {} negotiated {}x{} {}, expected {}x{} {}",
                settings.device,
                active.width,
                active.height,
                active.fourcc,
                settings.width,
                settings.height,
                requested.fourcc
            ));
        }

        let timeout = settings.timeout;
        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                        .map_err(|err| anyhow::Error::new(err).context("map v4l2 capture buffer"))?;
                stream.set_timeout(timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            settings.device,
            active.width,
            active.height
        );
        Ok(Self {
            device: settings.device.clone(),
            state,
            frame_count: 0,
            timeouts: 0,
            cycle: BufferCycle::default(),
        })
    }

    pub(super) fn acquire(&mut self) -> Result<Acquired<'_>> {
        use v4l::io::traits::{CaptureStream, Stream};

        if self.cycle.take_restart() {
            // STREAMOFF hands the queued buffer back; the next `next()` queues
            // it again and restarts streaming.
            self.state
                .with_mut(|fields| fields.stream.stop())
                .with_context(|| format!("VIDIOC_STREAMOFF on {}", self.device))?;
            log::debug!("{}: stream restarted after a failed wait", self.device);
        }

        let err = match self.state.with_mut(|fields| fields.stream.next()) {
            Ok((buf, _meta)) => {
                self.frame_count += 1;
                return Ok(Acquired::Frame(buf));
            }
            Err(err) => err,
        };
        match self.cycle.wait_failed(err.kind()) {
            Some(outcome) => {
                if matches!(outcome, Acquired::TimedOut) {
                    self.timeouts += 1;
                }
                Ok(outcome)
            }
            None => Err(anyhow::Error::new(err)
                .context(format!("capture frame from {}", self.device))),
        }
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            timeouts: self.timeouts,
            restarts: self.cycle.restarts(),
            device: self.device.clone(),
        }
    }
}
