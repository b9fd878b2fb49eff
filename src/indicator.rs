//! Indicator output.
//!
//! One GPIO line configured as a digital output, driven on when the target
//! label is detected. Device paths starting with `stub://` keep the state in
//! memory instead of touching hardware.

use anyhow::Result;

use crate::config::IndicatorSettings;

pub struct Indicator {
    backend: IndicatorBackend,
    state: bool,
}

enum IndicatorBackend {
    Stub,
    #[cfg(target_os = "linux")]
    Chardev(chardev::LineHandle),
}

impl Indicator {
    /// Request the configured line as an output, initially off.
    pub fn open(settings: &IndicatorSettings) -> Result<Self> {
        let backend = if settings.chip.starts_with("stub://") {
            IndicatorBackend::Stub
        } else {
            Self::open_device(settings)?
        };
        log::info!(
            "Indicator: line {} on {} configured as output",
            settings.line,
            settings.chip
        );
        Ok(Self {
            backend,
            state: false,
        })
    }

    #[cfg(target_os = "linux")]
    fn open_device(settings: &IndicatorSettings) -> Result<IndicatorBackend> {
        Ok(IndicatorBackend::Chardev(chardev::LineHandle::request(
            &settings.chip,
            settings.line,
        )?))
    }

    #[cfg(not(target_os = "linux"))]
    fn open_device(settings: &IndicatorSettings) -> Result<IndicatorBackend> {
        Err(anyhow::anyhow!(
            "GPIO chip {} requires Linux (use a stub:// path)",
            settings.chip
        ))
    }

    /// Drive the line. Write failures are logged, not returned.
    pub fn set(&mut self, on: bool) {
        match &self.backend {
            IndicatorBackend::Stub => {}
            #[cfg(target_os = "linux")]
            IndicatorBackend::Chardev(handle) => {
                if let Err(err) = handle.write(on) {
                    log::warn!("Indicator: write failed: {:#}", err);
                }
            }
        }
        self.state = on;
    }

    /// Last state written.
    pub fn is_on(&self) -> bool {
        self.state
    }
}

impl Drop for Indicator {
    fn drop(&mut self) {
        if self.state {
            self.set(false);
        }
    }
}

#[cfg(target_os = "linux")]
mod chardev {
    use anyhow::{anyhow, Context, Result};
    use std::fs::File;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    const GPIOHANDLES_MAX: usize = 64;
    const GPIOHANDLE_REQUEST_OUTPUT: u32 = 1 << 1;
    const CONSUMER: &[u8] = b"smart-verifier";

    #[repr(C)]
    struct GpioHandleRequest {
        lineoffsets: [u32; GPIOHANDLES_MAX],
        flags: u32,
        default_values: [u8; GPIOHANDLES_MAX],
        consumer_label: [u8; 32],
        lines: u32,
        fd: libc::c_int,
    }

    #[repr(C)]
    struct GpioHandleData {
        values: [u8; GPIOHANDLES_MAX],
    }

    const fn iowr(nr: u64, size: usize) -> u64 {
        (3 << 30) | ((size as u64) << 16) | (0xB4 << 8) | nr
    }

    const GPIO_GET_LINEHANDLE_IOCTL: u64 = iowr(0x03, std::mem::size_of::<GpioHandleRequest>());
    const GPIOHANDLE_SET_LINE_VALUES_IOCTL: u64 =
        iowr(0x09, std::mem::size_of::<GpioHandleData>());

    /// A requested output line. The kernel releases the line when the handle
    /// fd is closed.
    pub(super) struct LineHandle {
        fd: OwnedFd,
    }

    impl LineHandle {
        pub(super) fn request(chip: &str, line: u32) -> Result<Self> {
            let chip_file = File::options()
                .read(true)
                .write(true)
                .open(chip)
                .with_context(|| format!("open GPIO chip {}", chip))?;

            let mut request = GpioHandleRequest {
                lineoffsets: [0; GPIOHANDLES_MAX],
                flags: GPIOHANDLE_REQUEST_OUTPUT,
                default_values: [0; GPIOHANDLES_MAX],
                consumer_label: [0; 32],
                lines: 1,
                fd: -1,
            };
            request.lineoffsets[0] = line;
            request.consumer_label[..CONSUMER.len()].copy_from_slice(CONSUMER);

            let rc = unsafe {
                libc::ioctl(
                    chip_file.as_raw_fd(),
                    GPIO_GET_LINEHANDLE_IOCTL as _,
                    &mut request as *mut GpioHandleRequest,
                )
            };
            if rc < 0 || request.fd < 0 {
                return Err(anyhow!(std::io::Error::last_os_error()))
                    .with_context(|| format!("request GPIO line {} on {}", line, chip));
            }

            // SAFETY: the kernel handed us a freshly opened line handle fd.
            let fd = unsafe { OwnedFd::from_raw_fd(request.fd) };
            Ok(Self { fd })
        }

        pub(super) fn write(&self, on: bool) -> Result<()> {
            let mut data = GpioHandleData {
                values: [0; GPIOHANDLES_MAX],
            };
            data.values[0] = u8::from(on);
            let rc = unsafe {
                libc::ioctl(
                    self.fd.as_raw_fd(),
                    GPIOHANDLE_SET_LINE_VALUES_IOCTL as _,
                    &mut data as *mut GpioHandleData,
                )
            };
            if rc < 0 {
                return Err(anyhow!(std::io::Error::last_os_error()))
                    .context("GPIOHANDLE_SET_LINE_VALUES failed");
            }
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_settings() -> IndicatorSettings {
        IndicatorSettings {
            chip: "stub://indicator".to_string(),
            line: 3,
        }
    }

    #[test]
    fn starts_off_and_tracks_writes() -> Result<()> {
        let mut indicator = Indicator::open(&stub_settings())?;
        assert!(!indicator.is_on());
        indicator.set(true);
        assert!(indicator.is_on());
        indicator.set(false);
        assert!(!indicator.is_on());
        Ok(())
    }

    #[test]
    fn missing_chip_fails_to_open() {
        let settings = IndicatorSettings {
            chip: "/nonexistent/gpiochip9".to_string(),
            line: 0,
        };
        assert!(Indicator::open(&settings).is_err());
    }
}
