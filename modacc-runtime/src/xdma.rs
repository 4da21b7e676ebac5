//! XDMA PCIe backend
//!
//! Two DMA character devices carry bulk DDR traffic at explicit offsets.
//! The bypass device is mapped once and serves both the registers and the
//! global instruction stream.

use crate::driver::{DeviceIo, DriverConfig};
use crate::error::DeviceError;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Shared read-write mapping of the bypass window
#[derive(Debug)]
struct BypassWindow {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
}

impl BypassWindow {
    fn map(path: &Path, size: usize) -> Result<Self, DeviceError> {
        let file = open_channel(path)?;

        // SAFETY: the descriptor was just opened read-write and is kept alive
        // in `_file` for the lifetime of the mapping. The mapping is released
        // in Drop with the same pointer and size.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| DeviceError::DeviceUnavailable {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| DeviceError::DeviceUnavailable {
            path: path.to_path_buf(),
            source: std::io::Error::other("mmap returned a null mapping"),
        })?;

        debug!(path = %path.display(), size, "mapped bypass window");
        Ok(Self {
            ptr,
            size,
            _file: file,
        })
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), String> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(format!(
                "offset {offset:#x} + {len} exceeds the {:#x}-byte window",
                self.size
            )),
        }
    }

    fn read_u32(&self, offset: usize) -> Result<u32, DeviceError> {
        self.check(offset, 4).map_err(|e| DeviceError::read("register", e))?;
        // SAFETY: bounds checked above; registers are 4-byte aligned and the
        // read must not be elided or reordered.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        trace!(offset, value, "read register");
        Ok(value)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), DeviceError> {
        self.check(offset, 4).map_err(|e| DeviceError::write("register", e))?;
        trace!(offset, value, "write register");
        // SAFETY: bounds checked above; registers are 4-byte aligned and the
        // write has side effects on the device.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.check(offset, buf.len()).map_err(|e| DeviceError::read("bypass", e))?;
        // SAFETY: bounds checked above; `buf` is host memory and cannot alias
        // the device mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        self.check(offset, data.len()).map_err(|e| DeviceError::write("bypass", e))?;
        // SAFETY: bounds checked above; `data` is host memory and cannot alias
        // the device mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }
}

impl Drop for BypassWindow {
    fn drop(&mut self) {
        // SAFETY: pointer and size are exactly those returned by mmap, and no
        // reference into the mapping outlives `self`.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.size);
        }
    }
}

// SAFETY: the mapping is owned exclusively by this value; every access goes
// through `&self`/`&mut self`.
unsafe impl Send for BypassWindow {}
unsafe impl Sync for BypassWindow {}

#[derive(Debug)]
struct Handles {
    h2c: File,
    c2h: File,
    bypass: BypassWindow,
}

/// Linux XDMA board
#[derive(Debug)]
pub struct XdmaIo {
    config: DriverConfig,
    handles: Option<Handles>,
}

impl XdmaIo {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            handles: None,
        }
    }

    fn handles(&mut self) -> Result<&mut Handles, DeviceError> {
        self.handles.as_mut().ok_or(DeviceError::NotOpen)
    }
}

fn open_channel(path: &Path) -> Result<File, DeviceError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlags::NONBLOCK.bits() as i32)
        .open(path)
        .map_err(|source| DeviceError::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

impl DeviceIo for XdmaIo {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.handles.is_some() {
            return Ok(());
        }
        let h2c = open_channel(&self.config.h2c_path)?;
        let c2h = open_channel(&self.config.c2h_path)?;
        let bypass = BypassWindow::map(&self.config.bypass_path, self.config.bypass_size)?;
        self.handles = Some(Handles { h2c, c2h, bypass });
        debug!("xdma device open");
        Ok(())
    }

    fn close(&mut self) {
        if self.handles.take().is_some() {
            debug!("xdma device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.handles.is_some()
    }

    fn write_reg(&mut self, offset: u32, value: u32) -> Result<(), DeviceError> {
        self.handles()?.bypass.write_u32(offset as usize, value)
    }

    fn read_reg(&mut self, offset: u32) -> Result<u32, DeviceError> {
        self.handles()?.bypass.read_u32(offset as usize)
    }

    fn write_ddr(&mut self, address: u64, data: &[u8]) -> Result<(), DeviceError> {
        self.handles()?
            .h2c
            .write_all_at(data, address)
            .map_err(|e| DeviceError::write(format!("ddr {address:#x}"), e))
    }

    fn read_ddr(&mut self, address: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.handles()?
            .c2h
            .read_exact_at(buf, address)
            .map_err(|e| DeviceError::read(format!("ddr {address:#x}"), e))
    }

    fn write_bypass(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        self.handles()?.bypass.write_bytes(offset, data)
    }

    fn read_bypass(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.handles()?.bypass.read_bytes(offset, buf)
    }
}
