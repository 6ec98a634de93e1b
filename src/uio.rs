// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! UIO device discovery, register mapping and the interrupt protocol.
//!
//! The kernel exposes the AXI DMA as a generic UIO device: its register
//! window is mapping 0 of `/dev/uio<N>`, and its interrupt line is driven
//! through the same fd:
//!
//! - writing a 4-byte `1` unmasks the next interrupt, a 4-byte `0` masks;
//! - reading returns a 4-byte accumulating interrupt count and blocks
//!   until at least one interrupt has arrived;
//! - the fd polls readable exactly when an interrupt is pending.
//!
//! Devices are located by exact match against
//! `/sys/class/uio/uio<N>/name`.

use crate::error::{AxiDmaError, DmaResult};
use std::fs;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr::NonNull;

/// Sysfs base path for UIO devices.
const SYSFS_UIO_PATH: &str = "/sys/class/uio";

/// An open UIO device: interrupt fd plus (once mapped) its register BAR.
#[derive(Debug)]
pub struct UioDevice {
    file: fs::File,
    number: u32,
    mapping: Option<(NonNull<u8>, usize)>,
}

// SAFETY: the fd and mapping are exclusively owned by one channel.
unsafe impl Send for UioDevice {}

impl UioDevice {
    /// Find a UIO device whose `name` attribute matches exactly and open
    /// its character node read-write.
    ///
    /// # Errors
    ///
    /// Returns [`AxiDmaError::DeviceNotFound`] when no `uio<N>` entry
    /// carries the requested name, or an I/O error when the node cannot
    /// be opened.
    pub fn open(name: &str) -> DmaResult<Self> {
        let number = find_by_name(name)?.ok_or_else(|| AxiDmaError::DeviceNotFound(name.into()))?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/uio{number}"))?;

        log::debug!("UIO device {name}: /dev/uio{number}");

        Ok(Self {
            file,
            number,
            mapping: None,
        })
    }

    /// UIO device number, as in `/dev/uio<N>`.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Raw interrupt fd, suitable for `poll(2)`.
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Map one page of the device's register BAR (mapping 0).
    ///
    /// The mapping stays valid until the device is dropped; calling this
    /// again returns the existing mapping.
    pub fn map_registers(&mut self) -> DmaResult<NonNull<u8>> {
        if let Some((base, _)) = self.mapping {
            return Ok(base);
        }

        let len = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(AxiDmaError::MmapFailed(format!(
                "/dev/uio{}: {}",
                self.number,
                std::io::Error::last_os_error()
            )));
        }

        let base = NonNull::new(addr as *mut u8)
            .ok_or_else(|| AxiDmaError::MmapFailed(format!("/dev/uio{}", self.number)))?;
        self.mapping = Some((base, len));
        Ok(base)
    }

    /// Mask the device interrupt.
    pub fn irq_mask(&self) -> DmaResult<()> {
        self.irq_control(0)
    }

    /// Unmask the device interrupt.
    pub fn irq_unmask(&self) -> DmaResult<()> {
        self.irq_control(1)
    }

    fn irq_control(&self, value: u32) -> DmaResult<()> {
        let n = unsafe {
            libc::write(
                self.fd(),
                &value as *const u32 as *const libc::c_void,
                std::mem::size_of::<u32>(),
            )
        };
        if n != std::mem::size_of::<u32>() as isize {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Consume the pending interrupt, returning the accumulated count.
    ///
    /// Blocks until an interrupt has arrived; callers poll the fd first.
    pub fn irq_consume(&self) -> DmaResult<u32> {
        let mut count: u32 = 0;
        let n = unsafe {
            libc::read(
                self.fd(),
                &mut count as *mut u32 as *mut libc::c_void,
                std::mem::size_of::<u32>(),
            )
        };
        if n != std::mem::size_of::<u32>() as isize {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(count)
    }
}

impl Drop for UioDevice {
    fn drop(&mut self) {
        if let Some((base, len)) = self.mapping.take() {
            unsafe {
                libc::munmap(base.as_ptr() as *mut libc::c_void, len);
            }
        }
    }
}

/// Scan `/sys/class/uio` for a device whose name attribute equals `name`.
fn find_by_name(name: &str) -> DmaResult<Option<u32>> {
    let entries = match fs::read_dir(SYSFS_UIO_PATH) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(number) = uio_number(&file_name.to_string_lossy()) else {
            continue;
        };

        let attr = format!("{SYSFS_UIO_PATH}/uio{number}/name");
        let Ok(device_name) = fs::read_to_string(&attr) else {
            continue;
        };

        if device_name.trim_end() == name {
            return Ok(Some(number));
        }
    }

    Ok(None)
}

/// Extract `N` from a `uio<N>` directory entry.
fn uio_number(entry: &str) -> Option<u32> {
    entry.strip_prefix("uio")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_device_numbers() {
        assert_eq!(uio_number("uio0"), Some(0));
        assert_eq!(uio_number("uio12"), Some(12));
        assert_eq!(uio_number("uio"), None);
        assert_eq!(uio_number("uiox"), None);
        assert_eq!(uio_number("spi0"), None);
    }

    #[test]
    fn missing_sysfs_tree_reports_not_found() {
        // On machines without UIO the scan must degrade to "no device",
        // not an I/O error.
        match UioDevice::open("no-such-device-name") {
            Err(AxiDmaError::DeviceNotFound(name)) => assert_eq!(name, "no-such-device-name"),
            Err(AxiDmaError::Io(_)) => {} // sysfs exists but is unreadable
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
