//! Display surface.
//!
//! Maps a Linux framebuffer (`/dev/fbN`) and copies RGB565 regions into it.
//! `stub://` paths map an in-memory buffer with the same geometry rules so
//! the render path can run headless.

use anyhow::{anyhow, Result};

use crate::config::DisplaySettings;
use crate::screen::{Area, FlushTarget};

/// Packed RGB565.
pub const BYTES_PER_PIXEL: usize = 2;

/// Placement of the visible area inside the mapped memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FbGeometry {
    pub xres: u32,
    pub yres: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    /// Bytes per scan line.
    pub line_length: u32,
}

impl FbGeometry {
    /// Byte offset of pixel `(x, y)` of the visible area.
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (x + self.xoffset) as usize * BYTES_PER_PIXEL
            + (y + self.yoffset) as usize * self.line_length as usize
    }
}

pub struct Display {
    geometry: FbGeometry,
    backend: DisplayBackend,
    flushed_areas: u64,
}

enum DisplayBackend {
    Memory(Vec<u8>),
    #[cfg(target_os = "linux")]
    Device(fbdev::Mapping),
}

impl Display {
    /// Open and map the configured framebuffer.
    pub fn open(settings: &DisplaySettings) -> Result<Self> {
        let (geometry, backend) = if settings.device.starts_with("stub://") {
            let geometry = FbGeometry {
                xres: settings.width,
                yres: settings.height,
                xoffset: 0,
                yoffset: 0,
                line_length: settings.width * BYTES_PER_PIXEL as u32,
            };
            let len = geometry.line_length as usize * geometry.yres as usize;
            (geometry, DisplayBackend::Memory(vec![0u8; len]))
        } else {
            Self::open_device(&settings.device)?
        };

        if settings.width > geometry.xres || settings.height > geometry.yres {
            return Err(anyhow!(
                "screen {}x{} does not fit framebuffer {} ({}x{})",
                settings.width,
                settings.height,
                settings.device,
                geometry.xres,
                geometry.yres
            ));
        }

        log::info!(
            "Display: mapped {} ({}x{}, stride {})",
            settings.device,
            geometry.xres,
            geometry.yres,
            geometry.line_length
        );
        Ok(Self {
            geometry,
            backend,
            flushed_areas: 0,
        })
    }

    #[cfg(target_os = "linux")]
    fn open_device(device: &str) -> Result<(FbGeometry, DisplayBackend)> {
        let mapping = fbdev::Mapping::open(device)?;
        Ok((mapping.geometry(), DisplayBackend::Device(mapping)))
    }

    #[cfg(not(target_os = "linux"))]
    fn open_device(device: &str) -> Result<(FbGeometry, DisplayBackend)> {
        Err(anyhow!(
            "framebuffer {} requires Linux (use a stub:// path)",
            device
        ))
    }

    pub fn geometry(&self) -> FbGeometry {
        self.geometry
    }

    /// Number of regions blitted so far.
    pub fn flushed_areas(&self) -> u64 {
        self.flushed_areas
    }

    /// Copy a packed RGB565 region into the framebuffer.
    pub fn blit(&mut self, area: Area, pixels: &[u8]) -> Result<()> {
        let memory = match &mut self.backend {
            DisplayBackend::Memory(buffer) => buffer.as_mut_slice(),
            #[cfg(target_os = "linux")]
            DisplayBackend::Device(mapping) => mapping.as_mut_slice(),
        };
        blit_into(memory, &self.geometry, area, pixels)?;
        self.flushed_areas += 1;
        Ok(())
    }

    /// Read back the RGB565 value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        let memory = match &self.backend {
            DisplayBackend::Memory(buffer) => buffer.as_slice(),
            #[cfg(target_os = "linux")]
            DisplayBackend::Device(mapping) => mapping.as_slice(),
        };
        if x >= self.geometry.xres || y >= self.geometry.yres {
            return None;
        }
        let at = self.geometry.offset(x, y);
        memory
            .get(at..at + BYTES_PER_PIXEL)
            .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

impl FlushTarget for Display {
    fn flush(&mut self, area: Area, pixels: &[u8]) -> Result<()> {
        self.blit(area, pixels)
    }
}

fn blit_into(memory: &mut [u8], geometry: &FbGeometry, area: Area, pixels: &[u8]) -> Result<()> {
    let expected = area.pixel_count() * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(anyhow!(
            "blit of {:?} expects {} bytes, received {}",
            area,
            expected,
            pixels.len()
        ));
    }
    if area.x2 >= geometry.xres || area.y2 >= geometry.yres {
        return Err(anyhow!(
            "blit area {:?} outside {}x{} screen",
            area,
            geometry.xres,
            geometry.yres
        ));
    }

    let row_bytes = area.width() as usize * BYTES_PER_PIXEL;
    for (row, src) in (area.y1..=area.y2).zip(pixels.chunks_exact(row_bytes)) {
        let start = geometry.offset(area.x1, row);
        let dst = memory
            .get_mut(start..start + row_bytes)
            .ok_or_else(|| anyhow!("blit row {} runs past the framebuffer mapping", row))?;
        dst.copy_from_slice(src);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod fbdev {
    use anyhow::{anyhow, Context, Result};
    use std::fs::File;
    use std::os::fd::AsRawFd;

    use super::{FbGeometry, BYTES_PER_PIXEL};

    const FBIOGET_VSCREENINFO: u64 = 0x4600;
    const FBIOGET_FSCREENINFO: u64 = 0x4602;

    #[repr(C)]
    #[derive(Default)]
    struct FbBitfield {
        offset: u32,
        length: u32,
        msb_right: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    struct FbVarScreeninfo {
        xres: u32,
        yres: u32,
        xres_virtual: u32,
        yres_virtual: u32,
        xoffset: u32,
        yoffset: u32,
        bits_per_pixel: u32,
        grayscale: u32,
        red: FbBitfield,
        green: FbBitfield,
        blue: FbBitfield,
        transp: FbBitfield,
        nonstd: u32,
        activate: u32,
        height: u32,
        width: u32,
        accel_flags: u32,
        pixclock: u32,
        left_margin: u32,
        right_margin: u32,
        upper_margin: u32,
        lower_margin: u32,
        hsync_len: u32,
        vsync_len: u32,
        sync: u32,
        vmode: u32,
        rotate: u32,
        colorspace: u32,
        reserved: [u32; 4],
    }

    #[repr(C)]
    #[derive(Default)]
    struct FbFixScreeninfo {
        id: [u8; 16],
        smem_start: libc::c_ulong,
        smem_len: u32,
        type_: u32,
        type_aux: u32,
        visual: u32,
        xpanstep: u16,
        ypanstep: u16,
        ywrapstep: u16,
        line_length: u32,
        mmio_start: libc::c_ulong,
        mmio_len: u32,
        accel: u32,
        capabilities: u16,
        reserved: [u16; 2],
    }

    /// A mapped framebuffer. Unmapped and closed on drop.
    pub(super) struct Mapping {
        _file: File,
        ptr: *mut u8,
        len: usize,
        geometry: FbGeometry,
    }

    impl Mapping {
        pub(super) fn open(device: &str) -> Result<Self> {
            let file = File::options()
                .read(true)
                .write(true)
                .open(device)
                .with_context(|| format!("cannot open framebuffer {}", device))?;
            let fd = file.as_raw_fd();

            let mut finfo = FbFixScreeninfo::default();
            let rc = unsafe {
                libc::ioctl(fd, FBIOGET_FSCREENINFO as _, &mut finfo as *mut FbFixScreeninfo)
            };
            if rc != 0 {
                return Err(anyhow!(std::io::Error::last_os_error()))
                    .with_context(|| format!("FBIOGET_FSCREENINFO on {}", device));
            }

            let mut vinfo = FbVarScreeninfo::default();
            let rc = unsafe {
                libc::ioctl(fd, FBIOGET_VSCREENINFO as _, &mut vinfo as *mut FbVarScreeninfo)
            };
            if rc != 0 {
                return Err(anyhow!(std::io::Error::last_os_error()))
                    .with_context(|| format!("FBIOGET_VSCREENINFO on {}", device));
            }

            if vinfo.bits_per_pixel as usize != BYTES_PER_PIXEL * 8 {
                return Err(anyhow!(
                    "framebuffer {} is {} bpp, expected {}",
                    device,
                    vinfo.bits_per_pixel,
                    BYTES_PER_PIXEL * 8
                ));
            }

            let len = finfo.smem_len as usize;
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(anyhow!(std::io::Error::last_os_error()))
                    .with_context(|| format!("mmap of framebuffer {} failed", device));
            }

            Ok(Self {
                _file: file,
                ptr: ptr.cast::<u8>(),
                len,
                geometry: FbGeometry {
                    xres: vinfo.xres,
                    yres: vinfo.yres,
                    xoffset: vinfo.xoffset,
                    yoffset: vinfo.yoffset,
                    line_length: finfo.line_length,
                },
            })
        }

        pub(super) fn geometry(&self) -> FbGeometry {
            self.geometry
        }

        pub(super) fn as_slice(&self) -> &[u8] {
            // SAFETY: ptr/len describe a live MAP_SHARED mapping owned by self.
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }

        pub(super) fn as_mut_slice(&mut self) -> &mut [u8] {
            // SAFETY: as above, and &mut self guarantees exclusive access.
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
        }
    }

    impl Drop for Mapping {
        fn drop(&mut self) {
            let rc = unsafe { libc::munmap(self.ptr.cast(), self.len) };
            if rc != 0 {
                log::warn!(
                    "Display: munmap failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }

}
