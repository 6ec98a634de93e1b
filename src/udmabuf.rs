// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! u-dma-buf arena discovery and mapping.
//!
//! The u-dma-buf kernel module exports a physically contiguous,
//! DMA-coherent buffer as a character device. For a buffer named `<name>`:
//!
//! - `/sys/class/u-dma-buf/<name>/phys_addr` - physical base (hex)
//! - `/sys/class/u-dma-buf/<name>/size` - region size in bytes (decimal)
//! - `/dev/<name>` - the mappable device node
//!
//! The descriptor ring and its payload buffers are carved out of this one
//! region, so both its physical and virtual base addresses are recorded.

use crate::error::{AxiDmaError, DmaResult};
use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

/// Sysfs base path for u-dma-buf devices.
const SYSFS_UDMABUF_PATH: &str = "/sys/class/u-dma-buf";

/// A mapped u-dma-buf region: the coherent arena of one DMA channel.
#[derive(Debug)]
pub struct UdmaBuf {
    phys_addr: u64,
    virt: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned; see the crate-level
// single-thread-per-channel model.
unsafe impl Send for UdmaBuf {}

impl UdmaBuf {
    /// Find a u-dma-buf region by name and map `size` bytes of it starting
    /// at `offset`.
    ///
    /// A `size` of 0 requests everything the region holds past `offset`.
    /// `offset` must be page aligned, as it is forwarded to `mmap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sysfs attributes are missing or unparsable,
    /// the exported physical address is zero, the requested window does not
    /// fit in the region, or the mapping fails.
    pub fn open(name: &str, size: usize, offset: usize) -> DmaResult<Self> {
        let phys_addr = read_attr_hex(&format!("{SYSFS_UDMABUF_PATH}/{name}/phys_addr"))?;
        if phys_addr == 0 {
            return Err(AxiDmaError::InvalidAttribute {
                path: format!("{SYSFS_UDMABUF_PATH}/{name}/phys_addr"),
                reason: "physical address is zero".into(),
            });
        }

        let region_size = read_attr_dec(&format!("{SYSFS_UDMABUF_PATH}/{name}/size"))? as usize;

        let page_size = page_size();
        if offset % page_size != 0 {
            return Err(AxiDmaError::InvalidArgument(format!(
                "u-dma-buf offset {offset:#x} is not page aligned"
            )));
        }
        if offset >= region_size || size > region_size - offset {
            return Err(AxiDmaError::InvalidArgument(format!(
                "window of {size} bytes at offset {offset:#x} exceeds the {region_size}-byte region"
            )));
        }
        let len = if size == 0 { region_size - offset } else { size };

        let virt = map_device(&format!("/dev/{name}"), len, offset)?;

        log::debug!("u-dma-buf {name}: phys {phys_addr:#x} + {offset:#x}, {len} bytes mapped");

        Ok(Self {
            phys_addr: phys_addr + offset as u64,
            virt,
            len,
        })
    }

    /// Physical base address of the mapped window.
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Virtual base address of the mapped window.
    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    /// Length of the mapped window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapped window is empty. Always false for a successfully
    /// opened region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for UdmaBuf {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.virt.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn map_device(path: &str, len: usize, offset: usize) -> DmaResult<NonNull<u8>> {
    let file = fs::OpenOptions::new().read(true).write(true).open(path)?;

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            offset as libc::off_t,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(AxiDmaError::MmapFailed(format!(
            "{path}: {}",
            std::io::Error::last_os_error()
        )));
    }

    // The fd may be closed once the mapping exists; `file` drops here.
    Ok(NonNull::new(addr as *mut u8).ok_or_else(|| AxiDmaError::MmapFailed(path.into()))?)
}

fn read_attr(path: &str) -> DmaResult<String> {
    fs::read_to_string(Path::new(path))
        .map(|s| s.trim().to_string())
        .map_err(|e| AxiDmaError::InvalidAttribute {
            path: path.into(),
            reason: e.to_string(),
        })
}

/// Parse a hex sysfs attribute, with or without a `0x` prefix.
fn read_attr_hex(path: &str) -> DmaResult<u64> {
    let text = read_attr(path)?;
    parse_hex(&text).ok_or_else(|| AxiDmaError::InvalidAttribute {
        path: path.into(),
        reason: format!("not a hexadecimal value: {text:?}"),
    })
}

/// Parse a decimal sysfs attribute.
fn read_attr_dec(path: &str) -> DmaResult<u64> {
    let text = read_attr(path)?;
    text.parse().map_err(|_| AxiDmaError::InvalidAttribute {
        path: path.into(),
        reason: format!("not a decimal value: {text:?}"),
    })
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_prefix() {
        assert_eq!(parse_hex("0x1e000000"), Some(0x1e00_0000));
        assert_eq!(parse_hex("0X1E000000"), Some(0x1e00_0000));
        assert_eq!(parse_hex("3f000000"), Some(0x3f00_0000));
        assert_eq!(parse_hex("0x0"), Some(0));
    }

    #[test]
    fn rejects_garbage_hex() {
        assert_eq!(parse_hex(""), None);
        assert_eq!(parse_hex("0x"), None);
        assert_eq!(parse_hex("phys"), None);
    }

    #[test]
    fn reads_attributes_from_files() {
        let dir = std::env::temp_dir().join(format!("uaxidma-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let hex_path = dir.join("phys_addr");
        fs::write(&hex_path, "0x1e000000\n").unwrap();
        assert_eq!(read_attr_hex(hex_path.to_str().unwrap()).unwrap(), 0x1e00_0000);

        let dec_path = dir.join("size");
        fs::write(&dec_path, "1048576\n").unwrap();
        assert_eq!(read_attr_dec(dec_path.to_str().unwrap()).unwrap(), 1_048_576);

        fs::write(&dec_path, "lots\n").unwrap();
        assert!(read_attr_dec(dec_path.to_str().unwrap()).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_attribute_is_an_error() {
        let err = read_attr_hex("/nonexistent/uaxidma/phys_addr").unwrap_err();
        assert!(matches!(err, AxiDmaError::InvalidAttribute { .. }));
    }
}
