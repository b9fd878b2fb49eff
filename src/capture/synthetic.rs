use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;

use super::{Acquired, BufferCycle, CaptureStats};
use crate::config::CameraSettings;

/// Synthetic source for `stub://` device paths.
///
/// Produces a deterministic pattern that shifts every frame, so two sources
/// opened with the same settings yield identical frame sequences. Query
/// parameters inject failed waits: `?stall_every=N` makes every Nth acquire
/// time out and `?interrupt_every=N` makes it return as if a signal arrived.
///
/// The single buffer is modelled like a driver-owned one: a failed wait
/// leaves it queued, and queueing it again without a restart is an error.
pub struct SyntheticSource {
    device: String,
    stall_every: Option<u64>,
    interrupt_every: Option<u64>,
    attempts: u64,
    frame_count: u64,
    timeouts: u64,
    queued: bool,
    cycle: BufferCycle,
    /// Simulated scene state, bumped periodically.
    scene_state: u8,
    buffer: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        let stall_every = parse_every(&settings.device, "stall_every")?;
        let interrupt_every = parse_every(&settings.device, "interrupt_every")?;
        let len = settings.width as usize * settings.height as usize * 3;
        log::info!(
            "SyntheticSource: streaming {} ({}x{})",
            settings.device,
            settings.width,
            settings.height
        );
        Ok(Self {
            device: settings.device.clone(),
            stall_every,
            interrupt_every,
            attempts: 0,
            frame_count: 0,
            timeouts: 0,
            queued: false,
            cycle: BufferCycle::default(),
            scene_state: 0,
            buffer: vec![0u8; len],
        })
    }

    pub fn acquire(&mut self) -> Result<Acquired<'_>> {
        if self.cycle.take_restart() {
            log::debug!("{}: restarting stream after a failed wait", self.device);
            self.queued = false;
        }
        if self.queued {
            return Err(anyhow!(
                "{}: capture buffer is still queued with the driver",
                self.device
            ));
        }
        self.queued = true;

        self.attempts += 1;
        if let Some(kind) = self.failed_wait() {
            let outcome = self
                .cycle
                .wait_failed(kind)
                .ok_or_else(|| anyhow!("{}: unexpected wait error {:?}", self.device, kind))?;
            if kind == ErrorKind::TimedOut {
                self.timeouts += 1;
            }
            return Ok(outcome);
        }
        self.queued = false;

        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + self.scene_state as u64;
        for (i, pixel) in self.buffer.iter_mut().enumerate() {
            *pixel = ((i as u64 + shift) % 256) as u8;
        }
        Ok(Acquired::Frame(&self.buffer))
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            timeouts: self.timeouts,
            restarts: self.cycle.restarts(),
            device: self.device.clone(),
        }
    }

    fn failed_wait(&self) -> Option<ErrorKind> {
        let hits = |every: Option<u64>| every.is_some_and(|every| self.attempts % every == 0);
        if hits(self.interrupt_every) {
            Some(ErrorKind::Interrupted)
        } else if hits(self.stall_every) {
            Some(ErrorKind::TimedOut)
        } else {
            None
        }
    }
}

fn parse_every(device: &str, key: &str) -> Result<Option<u64>> {
    let Some((_, query)) = device.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let Some(value) = pair
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
        else {
            continue;
        };
        let every: u64 = value
            .parse()
            .with_context(|| format!("invalid {} in {}", key, device))?;
        if every == 0 {
            return Err(anyhow!("{} must be greater than zero in {}", key, device));
        }
        return Ok(Some(every));
    }
    Ok(None)
}
